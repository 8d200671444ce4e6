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

//! Index join of two tables
//!
//! Both tables are aligned to common boundaries, then a cursor walk over the
//! key sets decides which partition pairs are joined. Each pair becomes one
//! local join task.

use crate::error::{Code, FrameError, FrameResult};
use crate::frame::{JoinHow, JoinSuffixes};
use crate::graph::{tokenize, Datum, GraphBuilder, Task, TaskKey};
use crate::ops::align::{align_pair, KeySet};
use crate::ops::hash_join::hash_join;
use crate::partition::Divisions;
use crate::table::Table;

/// One output partition of an index join
///
/// `None` on one side means the other side is joined against an empty frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPair {
    pub left: Option<usize>,
    pub right: Option<usize>,
}

/// Walk forward over `probe`, matching each set to the first set of `build`
/// at or after the cursor that intersects it
fn walk(probe: &[KeySet], build: &[KeySet], keep_unmatched: bool) -> Vec<(usize, Option<usize>)> {
    let mut pairs = Vec::with_capacity(probe.len());
    let mut pivot = 0;
    for (i, keys) in probe.iter().enumerate() {
        let found = (pivot..build.len()).find(|&j| !keys.is_disjoint(&build[j]));
        match found {
            Some(j) => {
                pairs.push((i, Some(j)));
                pivot = j + 1;
            }
            None if keep_unmatched => pairs.push((i, None)),
            None => {}
        }
    }
    pairs
}

/// Decide which partition pairs an index join evaluates
///
/// The cursor only moves forward, so each partition is matched at most once.
/// This relies on both sides being aligned to the same boundaries.
///
/// # Arguments
/// * `left` - Key sets of the left partitions
/// * `right` - Key sets of the right partitions
/// * `how` - `Inner` keeps matched pairs only, `Left` also keeps unmatched
///   left partitions, `Right` is `Left` with the sides swapped
///
/// # Returns
/// Pairs in output order
pub fn pair_partitions(left: &[KeySet], right: &[KeySet], how: JoinHow) -> FrameResult<Vec<PartitionPair>> {
    let pairs = match how {
        JoinHow::Inner | JoinHow::Left => walk(left, right, how == JoinHow::Left)
            .into_iter()
            .map(|(l, r)| PartitionPair {
                left: Some(l),
                right: r,
            })
            .collect(),
        JoinHow::Right => walk(right, left, true)
            .into_iter()
            .map(|(r, l)| PartitionPair {
                left: l,
                right: Some(r),
            })
            .collect(),
        JoinHow::Outer => return Err(FrameError::new(Code::NotImplemented, "outer join")),
    };
    Ok(pairs)
}

/// Join two tables on their index
///
/// Fails before building anything when `how` is outer or when the tables
/// share column names and `suffixes` is empty. Tables with unknown divisions
/// get their divisions computed first. The output divisions are unknown.
pub fn join(left: &Table, right: &Table, how: JoinHow, suffixes: &JoinSuffixes) -> FrameResult<Table> {
    if how == JoinHow::Outer {
        return Err(FrameError::new(Code::NotImplemented, "outer join"));
    }
    let meta = left.meta().join_index(right.meta(), how, suffixes)?;

    let left = if left.known_divisions() { left.clone() } else { left.compute_divisions()? };
    let right = if right.known_divisions() { right.clone() } else { right.compute_divisions()? };
    let (la, ra) = align_pair(&left, &right)?;
    let pairs = pair_partitions(&la.key_sets, &ra.key_sets, how)?;

    let name = format!(
        "join-{}",
        tokenize(&(la.table.name(), ra.table.name(), how.as_str(), &suffixes.left, &suffixes.right))?
    );
    let mut builder = GraphBuilder::new(la.table.graph());
    builder.merge(ra.table.graph());
    let left_meta = la.table.meta().clone();
    let right_meta = ra.table.meta().clone();
    let mut tasks = Vec::with_capacity(pairs.len());
    for pair in &pairs {
        let suffixes = suffixes.clone();
        let task = match (pair.left, pair.right) {
            (Some(l), Some(r)) => Task::apply("join", vec![la.table.key(l), ra.table.key(r)], move |inputs| {
                let joined = inputs[0].as_frame()?.join_index(inputs[1].as_frame()?, how, &suffixes)?;
                Ok(Datum::Frame(joined))
            }),
            (Some(l), None) => {
                let right_meta = right_meta.clone();
                Task::apply("join-pad", vec![la.table.key(l)], move |inputs| {
                    let joined = inputs[0].as_frame()?.join_index(&right_meta, JoinHow::Left, &suffixes)?;
                    Ok(Datum::Frame(joined))
                })
            }
            (None, Some(r)) => {
                let left_meta = left_meta.clone();
                Task::apply("join-pad", vec![ra.table.key(r)], move |inputs| {
                    let joined = left_meta.join_index(inputs[0].as_frame()?, JoinHow::Right, &suffixes)?;
                    Ok(Datum::Frame(joined))
                })
            }
            (None, None) => continue,
        };
        tasks.push(task);
    }
    let npartitions = tasks.len();
    for (i, task) in tasks.into_iter().enumerate() {
        builder.insert(TaskKey::new(name.clone(), i), task);
    }

    log::debug!(
        "{} join of {} and {}: {} aligned buckets, {} output partitions",
        how,
        left.name(),
        right.name(),
        la.key_sets.len(),
        npartitions
    );
    Table::new(
        left.ctx().clone(),
        builder.build(),
        name,
        meta,
        Divisions::unknown(npartitions),
    )
}

/// Join on index values (`on = None`) or on key columns
pub fn merge(
    left: &Table,
    right: &Table,
    on: Option<&[String]>,
    how: JoinHow,
    suffixes: &JoinSuffixes,
) -> FrameResult<Table> {
    match on {
        None => join(left, right, how, suffixes),
        Some(on) => hash_join(left, right, on, how, suffixes),
    }
}

impl Table {
    /// Index join; see [`join`]
    pub fn join(&self, other: &Table, how: JoinHow, suffixes: &JoinSuffixes) -> FrameResult<Table> {
        join(self, other, how, suffixes)
    }

    /// Index or column join with `"_x"`/`"_y"` as the default suffixes
    pub fn merge(&self, other: &Table, on: Option<&[String]>, how: JoinHow) -> FrameResult<Table> {
        merge(self, other, on, how, &JoinSuffixes::new("_x", "_y"))
    }
}
