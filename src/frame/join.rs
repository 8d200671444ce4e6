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

//! Local joins between two frames
//!
//! Both the index join and the column join hash the build side's keys through
//! `arrow_row` so that multi-column and mixed-type keys compare byte-wise, then
//! probe with the other side. Unmatched rows of the preserved side are paired
//! with a null position, which Arrow's `take` turns into null values.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt64Array};
use arrow::datatypes::{Field, Schema};
use arrow_row::{RowConverter, SortField};
use hashbrown::HashMap;

use crate::error::{Code, FrameError, FrameResult};
use crate::frame::{range_index, rebuild_batch, Frame};

/// Join type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinHow {
    Inner,
    Left,
    Right,
    Outer,
}

impl JoinHow {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinHow::Inner => "inner",
            JoinHow::Left => "left",
            JoinHow::Right => "right",
            JoinHow::Outer => "outer",
        }
    }
}

impl fmt::Display for JoinHow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JoinHow {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inner" => Ok(JoinHow::Inner),
            "left" => Ok(JoinHow::Left),
            "right" => Ok(JoinHow::Right),
            "outer" => Ok(JoinHow::Outer),
            other => Err(FrameError::new(
                Code::Invalid,
                format!("unsupported join type '{}', expected inner, left, right or outer", other),
            )),
        }
    }
}

/// Suffixes appended to overlapping column names
///
/// Empty strings mean "no suffix"; joining frames with overlapping columns
/// and no suffixes at all is a configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct JoinSuffixes {
    pub left: String,
    pub right: String,
}

impl JoinSuffixes {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }

    /// No suffixes
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }
}

/// Output column names of a join: `(left names, right names)`
///
/// Right-side columns listed in `on` are not repeated in the output.
/// Columns present on both sides get the suffixes; overlapping columns with
/// no suffixes are rejected.
pub fn joined_column_names(
    left: &Schema,
    right: &Schema,
    on: &[String],
    suffixes: &JoinSuffixes,
) -> FrameResult<(Vec<String>, Vec<String>)> {
    let right_names: Vec<&String> = right
        .fields()
        .iter()
        .map(|f| f.name())
        .filter(|n| !on.contains(n))
        .collect();
    let overlap: Vec<String> = left
        .fields()
        .iter()
        .map(|f| f.name())
        .filter(|n| !on.contains(n) && right_names.contains(n))
        .cloned()
        .collect();

    if !overlap.is_empty() && suffixes.is_empty() {
        return Err(FrameError::new(
            Code::Invalid,
            format!("columns overlap but no suffix specified: {:?}", overlap),
        ));
    }

    let left_out = left
        .fields()
        .iter()
        .map(|f| {
            if overlap.contains(f.name()) {
                format!("{}{}", f.name(), suffixes.left)
            } else {
                f.name().clone()
            }
        })
        .collect::<Vec<_>>();
    let right_out = right_names
        .into_iter()
        .map(|n| {
            if overlap.contains(n) {
                format!("{}{}", n, suffixes.right)
            } else {
                n.clone()
            }
        })
        .collect::<Vec<_>>();

    for name in &right_out {
        if left_out.contains(name) {
            return Err(FrameError::new(
                Code::Invalid,
                format!("suffixes {:?} produce duplicate column '{}'", suffixes, name),
            ));
        }
    }
    Ok((left_out, right_out))
}

impl Frame {
    /// Join two frames on their index values
    ///
    /// Inner and left joins keep the left frame's row order and index; a right
    /// join keeps the right frame's. Outer joins are not supported.
    pub fn join_index(&self, right: &Frame, how: JoinHow, suffixes: &JoinSuffixes) -> FrameResult<Frame> {
        if self.index_type() != right.index_type() {
            return Err(FrameError::new(
                Code::Invalid,
                format!(
                    "cannot join on index types {} and {}",
                    self.index_type(),
                    right.index_type()
                ),
            ));
        }
        let (left_idx, right_idx) = match_rows(&[self.index().clone()], &[right.index().clone()], how)?;
        let index = match how {
            JoinHow::Right => arrow::compute::take(right.index().as_ref(), &right_idx, None)?,
            _ => arrow::compute::take(self.index().as_ref(), &left_idx, None)?,
        };
        let name = match how {
            JoinHow::Right => right.index_name().map(str::to_string),
            _ => self.index_name().map(str::to_string),
        };
        assemble(self, right, &left_idx, &right_idx, how, &[], suffixes, index).map(|f| f.with_index_name(name))
    }

    /// Join two frames on equally named key columns
    ///
    /// Key columns appear once in the output, taken from the preserved side.
    /// The result carries a fresh range index.
    pub fn merge_on(&self, right: &Frame, on: &[String], how: JoinHow, suffixes: &JoinSuffixes) -> FrameResult<Frame> {
        if on.is_empty() {
            return Err(FrameError::new(Code::Invalid, "merge requires at least one key column"));
        }
        let mut left_keys = Vec::with_capacity(on.len());
        let mut right_keys = Vec::with_capacity(on.len());
        for key in on {
            let l = self.column(key)?;
            let r = right.column(key)?;
            if l.data_type() != r.data_type() {
                return Err(FrameError::new(
                    Code::TypeError,
                    format!("key column '{}' has types {} and {}", key, l.data_type(), r.data_type()),
                ));
            }
            left_keys.push(l.clone());
            right_keys.push(r.clone());
        }
        let (left_idx, right_idx) = match_rows(&left_keys, &right_keys, how)?;
        let index = range_index(0, left_idx.len());
        assemble(self, right, &left_idx, &right_idx, how, on, suffixes, index)
    }
}

/// Pair row positions of two key sets
///
/// Null keys never match.
fn match_rows(left: &[ArrayRef], right: &[ArrayRef], how: JoinHow) -> FrameResult<(UInt64Array, UInt64Array)> {
    if how == JoinHow::Outer {
        return Err(FrameError::new(Code::NotImplemented, "outer join"));
    }

    let fields: Vec<SortField> = left.iter().map(|a| SortField::new(a.data_type().clone())).collect();
    let converter = RowConverter::new(fields)?;
    let left_rows = converter.convert_columns(left)?;
    let right_rows = converter.convert_columns(right)?;

    // build on the side that is not preserved
    let (build, build_keys, probe, probe_keys) = match how {
        JoinHow::Right => (&left_rows, left, &right_rows, right),
        _ => (&right_rows, right, &left_rows, left),
    };

    let mut table: HashMap<Vec<u8>, Vec<u64>> = HashMap::with_capacity(build.num_rows());
    for i in 0..build.num_rows() {
        if has_null(build_keys, i) {
            continue;
        }
        table.entry(build.row(i).as_ref().to_vec()).or_insert_with(Vec::new).push(i as u64);
    }

    let preserve = how != JoinHow::Inner;
    let mut probe_out: Vec<Option<u64>> = Vec::with_capacity(probe.num_rows());
    let mut build_out: Vec<Option<u64>> = Vec::with_capacity(probe.num_rows());
    for i in 0..probe.num_rows() {
        let matches = if has_null(probe_keys, i) {
            None
        } else {
            table.get(probe.row(i).as_ref())
        };
        match matches {
            Some(rows) => {
                for &j in rows {
                    probe_out.push(Some(i as u64));
                    build_out.push(Some(j));
                }
            }
            None if preserve => {
                probe_out.push(Some(i as u64));
                build_out.push(None);
            }
            None => {}
        }
    }

    let probe_out = UInt64Array::from(probe_out);
    let build_out = UInt64Array::from(build_out);
    Ok(match how {
        JoinHow::Right => (build_out, probe_out),
        _ => (probe_out, build_out),
    })
}

fn has_null(keys: &[ArrayRef], row: usize) -> bool {
    keys.iter().any(|k| k.is_null(row))
}

#[allow(clippy::too_many_arguments)]
fn assemble(
    left: &Frame,
    right: &Frame,
    left_idx: &UInt64Array,
    right_idx: &UInt64Array,
    how: JoinHow,
    on: &[String],
    suffixes: &JoinSuffixes,
    index: ArrayRef,
) -> FrameResult<Frame> {
    let left_schema = left.schema();
    let right_schema = right.schema();
    let (left_names, right_names) = joined_column_names(&left_schema, &right_schema, on, suffixes)?;

    let rows = left_idx.len();
    let mut fields = Vec::with_capacity(left_names.len() + right_names.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.capacity());

    for (field, name) in left_schema.fields().iter().zip(left_names) {
        let column = if how == JoinHow::Right && on.contains(field.name()) {
            arrow::compute::take(right.column(field.name())?.as_ref(), right_idx, None)?
        } else {
            let source = left.column(field.name())?;
            arrow::compute::take(source.as_ref(), left_idx, None)?
        };
        let nullable = field.is_nullable() || (how == JoinHow::Right && !on.contains(field.name()));
        fields.push(Field::new(name, field.data_type().clone(), nullable));
        columns.push(column);
    }

    let right_fields = right_schema.fields().iter().filter(|f| !on.contains(f.name()));
    for (field, name) in right_fields.zip(right_names) {
        let source = right.column(field.name())?;
        let column = arrow::compute::take(source.as_ref(), right_idx, None)?;
        let nullable = field.is_nullable() || how == JoinHow::Left;
        fields.push(Field::new(name, field.data_type().clone(), nullable));
        columns.push(column);
    }

    let data = rebuild_batch(Arc::new(Schema::new(fields)), columns, rows)?;
    Frame::new(index, data)
}
