// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Division boundaries
//!
//! A table of `N` partitions has `N + 1` divisions. When known, partition `i`
//! holds index values in `[divisions[i], divisions[i + 1]]` and the sequence
//! is non-decreasing. Unknown divisions are all `None` and promise nothing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Code, FrameError, FrameResult};
use crate::scalar::ScalarValue;

/// Partition boundaries of a table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Divisions(Vec<Option<ScalarValue>>);

impl Divisions {
    /// Unknown divisions for `npartitions` partitions
    pub fn unknown(npartitions: usize) -> Self {
        Divisions(vec![None; npartitions + 1])
    }

    /// Known divisions; must have at least two values and be non-decreasing
    pub fn known(values: Vec<ScalarValue>) -> FrameResult<Self> {
        if values.len() < 2 {
            return Err(FrameError::new(
                Code::Invalid,
                format!("known divisions need at least two values, got {}", values.len()),
            ));
        }
        if let Some(w) = values.windows(2).find(|w| w[0] > w[1]) {
            return Err(FrameError::new(
                Code::Invalid,
                format!("divisions must be non-decreasing, found {} before {}", w[0], w[1]),
            ));
        }
        Ok(Divisions(values.into_iter().map(Some).collect()))
    }

    /// Divisions `[min_0, ..., min_{N-1}, max_{N-1}]` from per-partition bounds
    ///
    /// Fails when a partition's maximum exceeds the next partition's minimum.
    pub fn from_bounds(mins: &[ScalarValue], maxes: &[ScalarValue]) -> FrameResult<Self> {
        if mins.len() != maxes.len() || mins.is_empty() {
            return Err(FrameError::new(
                Code::Invalid,
                format!("mismatched partition bounds: {} minima, {} maxima", mins.len(), maxes.len()),
            ));
        }
        for i in 0..mins.len() - 1 {
            if maxes[i] > mins[i + 1] {
                return Err(FrameError::new(
                    Code::Invalid,
                    format!(
                        "partitions are not sorted by index: partition {} ends at {} after partition {} starts at {}",
                        i,
                        maxes[i],
                        i + 1,
                        mins[i + 1]
                    ),
                ));
            }
        }
        let mut values = mins.to_vec();
        values.push(maxes[maxes.len() - 1].clone());
        Self::known(values)
    }

    pub fn npartitions(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// True iff no division is unknown
    pub fn is_known(&self) -> bool {
        self.0.len() >= 2 && self.0.iter().all(Option::is_some)
    }

    pub fn values(&self) -> &[Option<ScalarValue>] {
        &self.0
    }

    /// The boundaries if all are known
    pub fn known_values(&self) -> Option<Vec<ScalarValue>> {
        if !self.is_known() {
            return None;
        }
        self.0.iter().cloned().collect()
    }

    /// Inclusive bounds of partition `i`
    pub fn bounds(&self, i: usize) -> Option<(&ScalarValue, &ScalarValue)> {
        match (self.0.get(i), self.0.get(i + 1)) {
            (Some(Some(lo)), Some(Some(hi))) => Some((lo, hi)),
            _ => None,
        }
    }

    /// Whether `value` may lie in partition `i`
    pub fn contains(&self, i: usize, value: &ScalarValue) -> bool {
        match self.bounds(i) {
            Some((lo, hi)) => value >= lo && value <= hi,
            None => true,
        }
    }
}

impl fmt::Display for Divisions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match v {
                Some(v) => write!(f, "{}", v)?,
                None => write!(f, "None")?,
            }
        }
        write!(f, ")")
    }
}
