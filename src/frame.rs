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

//! In-memory partitions
//!
//! A [`Frame`] is one partition of a lazy table: an Arrow `RecordBatch` of data
//! columns plus a separate index array of the same length. Every per-partition
//! primitive the coordination algorithms rely on (local sort, filter, concat,
//! first/last index value, distinct values, null-filled columns, slicing by
//! index bound) is implemented here with Arrow compute kernels.
//!
//! Frames are immutable; every operation returns a new frame sharing buffers
//! with its input where Arrow allows it.

pub mod join;
pub mod query;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Int64Array, Scalar};
use arrow::compute::kernels::boolean::{and, is_null, or_kleene};
use arrow::compute::kernels::cmp::{gt_eq, lt_eq};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow_row::{RowConverter, SortField};
use hashbrown::HashSet;

use crate::error::{Code, FrameError, FrameResult};
use crate::scalar::ScalarValue;

pub use join::{JoinHow, JoinSuffixes};

/// Default name given to an anonymous index when it is turned into a column
pub const DEFAULT_INDEX_NAME: &str = "index";

/// One partition: an index array and a batch of data columns
#[derive(Clone)]
pub struct Frame {
    index: ArrayRef,
    index_name: Option<String>,
    data: RecordBatch,
}

impl Frame {
    /// Create a frame from an index array and a batch of the same length
    pub fn new(index: ArrayRef, data: RecordBatch) -> FrameResult<Self> {
        if index.len() != data.num_rows() {
            return Err(FrameError::new(
                Code::Invalid,
                format!(
                    "index length {} does not match number of rows {}",
                    index.len(),
                    data.num_rows()
                ),
            ));
        }
        Ok(Self {
            index,
            index_name: None,
            data,
        })
    }

    /// Wrap a batch, giving it a range index `0..num_rows`
    pub fn from_batch(data: RecordBatch) -> Self {
        let index = range_index(0, data.num_rows());
        Self {
            index,
            index_name: None,
            data,
        }
    }

    /// A frame holding only an index and no data columns
    pub fn from_index(index: ArrayRef) -> FrameResult<Self> {
        let data = rebuild_batch(Arc::new(Schema::empty()), vec![], index.len())?;
        Ok(Self {
            index,
            index_name: None,
            data,
        })
    }

    /// Name the index
    pub fn with_index_name(mut self, name: Option<String>) -> Self {
        self.index_name = name;
        self
    }

    pub fn index(&self) -> &ArrayRef {
        &self.index
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index_name.as_deref()
    }

    pub fn index_type(&self) -> &DataType {
        self.index.data_type()
    }

    pub fn data(&self) -> &RecordBatch {
        &self.data
    }

    pub fn schema(&self) -> SchemaRef {
        self.data.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.index.len()
    }

    pub fn num_columns(&self) -> usize {
        self.data.num_columns()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.data.schema().fields().iter().map(|f| f.name().clone()).collect()
    }

    /// Look up a data column by name
    pub fn column(&self, name: &str) -> FrameResult<&ArrayRef> {
        self.data
            .column_by_name(name)
            .ok_or_else(|| FrameError::new(Code::KeyError, format!("column '{}' not found", name)))
    }

    /// Zero-row frame with the same schema and index type
    pub fn empty_like(&self) -> Frame {
        self.slice(0, 0)
    }

    pub fn slice(&self, offset: usize, length: usize) -> Frame {
        Frame {
            index: self.index.slice(offset, length),
            index_name: self.index_name.clone(),
            data: self.data.slice(offset, length),
        }
    }

    /// Gather rows by position; `indices` is any unsigned integer array
    pub fn take(&self, indices: &dyn Array) -> FrameResult<Frame> {
        let index = arrow::compute::take(self.index.as_ref(), indices, None)?;
        let columns = self
            .data
            .columns()
            .iter()
            .map(|c| arrow::compute::take(c.as_ref(), indices, None))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Frame {
            index,
            index_name: self.index_name.clone(),
            data: rebuild_batch(self.data.schema(), columns, indices.len())?,
        })
    }

    /// Keep the rows where `mask` is true
    pub fn filter(&self, mask: &BooleanArray) -> FrameResult<Frame> {
        if mask.len() != self.num_rows() {
            return Err(FrameError::new(
                Code::Invalid,
                format!("mask length {} does not match {} rows", mask.len(), self.num_rows()),
            ));
        }
        let index = arrow::compute::filter(self.index.as_ref(), mask)?;
        let columns = self
            .data
            .columns()
            .iter()
            .map(|c| arrow::compute::filter(c.as_ref(), mask))
            .collect::<Result<Vec<_>, _>>()?;
        let rows = index.len();
        Ok(Frame {
            index,
            index_name: self.index_name.clone(),
            data: rebuild_batch(self.data.schema(), columns, rows)?,
        })
    }

    /// Concatenate frames with identical column names and types
    ///
    /// The result's fields are nullable when any input's field is.
    pub fn concat(frames: &[Frame]) -> FrameResult<Frame> {
        let first = frames.first().ok_or_else(|| {
            FrameError::new(Code::Invalid, "cannot concatenate an empty list of frames")
        })?;
        if frames.len() == 1 {
            return Ok(first.clone());
        }

        let schema = first.schema();
        let mut nullable: Vec<bool> = schema.fields().iter().map(|f| f.is_nullable()).collect();
        for frame in &frames[1..] {
            let other = frame.schema();
            if !same_columns(&schema, &other) {
                return Err(FrameError::new(
                    Code::Invalid,
                    format!("cannot concatenate frames with different schemas: {:?} vs {:?}", schema, other),
                ));
            }
            if frame.index_type() != first.index_type() {
                return Err(FrameError::new(
                    Code::Invalid,
                    format!(
                        "cannot concatenate frames with index types {} and {}",
                        first.index_type(),
                        frame.index_type()
                    ),
                ));
            }
            for (n, f) in nullable.iter_mut().zip(other.fields().iter()) {
                *n |= f.is_nullable();
            }
        }

        let fields: Vec<Field> = schema
            .fields()
            .iter()
            .zip(nullable)
            .map(|(f, n)| f.as_ref().clone().with_nullable(n))
            .collect();
        let merged = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));

        let indexes: Vec<&dyn Array> = frames.iter().map(|f| f.index.as_ref()).collect();
        let index = arrow::compute::concat(&indexes)?;

        let mut columns = Vec::with_capacity(schema.fields().len());
        for i in 0..schema.fields().len() {
            let parts: Vec<&dyn Array> = frames.iter().map(|f| f.data.column(i).as_ref()).collect();
            columns.push(arrow::compute::concat(&parts)?);
        }
        let rows = index.len();

        Ok(Frame {
            index,
            index_name: first.index_name.clone(),
            data: rebuild_batch(merged, columns, rows)?,
        })
    }

    /// Sort rows by index value
    pub fn sort_index(&self) -> FrameResult<Frame> {
        let indices = arrow::compute::sort_to_indices(self.index.as_ref(), None, None)?;
        self.take(&indices)
    }

    /// Sort rows by the values of one column
    pub fn sort_values(&self, by: &str) -> FrameResult<Frame> {
        let column = self.column(by)?;
        let indices = arrow::compute::sort_to_indices(column.as_ref(), None, None)?;
        self.take(&indices)
    }

    /// Move a data column into the index, dropping the current index
    pub fn set_index(&self, column: &str) -> FrameResult<Frame> {
        let position = self
            .data
            .schema()
            .index_of(column)
            .map_err(|_| FrameError::new(Code::KeyError, format!("column '{}' not found", column)))?;
        let index = self.data.column(position).clone();
        let mut data = self.data.clone();
        data.remove_column(position);
        Ok(Frame {
            index,
            index_name: Some(column.to_string()),
            data,
        })
    }

    /// Replace the index with another array of the same length
    pub fn replace_index(&self, index: ArrayRef, name: Option<String>) -> FrameResult<Frame> {
        Frame::new(index, self.data.clone()).map(|f| f.with_index_name(name))
    }

    /// Replace the index by `start..start + num_rows`
    pub fn with_range_index(&self, start: i64) -> Frame {
        Frame {
            index: range_index(start, self.num_rows()),
            index_name: None,
            data: self.data.clone(),
        }
    }

    /// Replace the index by `0..num_rows`
    pub fn reset_index(&self) -> Frame {
        self.with_range_index(0)
    }

    /// Add or replace a data column
    pub fn assign(&self, name: &str, values: ArrayRef) -> FrameResult<Frame> {
        if values.len() != self.num_rows() {
            return Err(FrameError::new(
                Code::Invalid,
                format!("column '{}' has {} values for {} rows", name, values.len(), self.num_rows()),
            ));
        }
        let schema = self.data.schema();
        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        let mut columns = self.data.columns().to_vec();
        let field = Field::new(name, values.data_type().clone(), true);
        match schema.index_of(name) {
            Ok(i) => {
                fields[i] = field;
                columns[i] = values;
            }
            Err(_) => {
                fields.push(field);
                columns.push(values);
            }
        }
        Ok(Frame {
            index: self.index.clone(),
            index_name: self.index_name.clone(),
            data: rebuild_batch(Arc::new(Schema::new(fields)), columns, self.num_rows())?,
        })
    }

    /// Project onto the named columns, in order
    pub fn select(&self, columns: &[&str]) -> FrameResult<Frame> {
        let schema = self.data.schema();
        let mut positions = Vec::with_capacity(columns.len());
        for name in columns {
            let i = schema
                .index_of(name)
                .map_err(|_| FrameError::new(Code::KeyError, format!("column '{}' not found", name)))?;
            positions.push(i);
        }
        let data = self.data.project(&positions)?;
        Ok(Frame {
            index: self.index.clone(),
            index_name: self.index_name.clone(),
            data,
        })
    }

    /// A frame of `rows` rows whose columns follow `schema` and hold only nulls
    pub fn nulls(schema: SchemaRef, index: ArrayRef) -> FrameResult<Frame> {
        let rows = index.len();
        let fields: Vec<Field> = schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone().with_nullable(true))
            .collect();
        let columns = fields
            .iter()
            .map(|f| arrow::array::new_null_array(f.data_type(), rows))
            .collect();
        Ok(Frame {
            index,
            index_name: None,
            data: rebuild_batch(Arc::new(Schema::new(fields)), columns, rows)?,
        })
    }

    pub fn first_index(&self) -> FrameResult<Option<ScalarValue>> {
        if self.is_empty() {
            return Ok(None);
        }
        ScalarValue::from_array(self.index.as_ref(), 0).map(Some)
    }

    pub fn last_index(&self) -> FrameResult<Option<ScalarValue>> {
        if self.is_empty() {
            return Ok(None);
        }
        ScalarValue::from_array(self.index.as_ref(), self.num_rows() - 1).map(Some)
    }

    /// Smallest non-null index value, `None` for an empty frame
    pub fn min_index(&self) -> FrameResult<Option<ScalarValue>> {
        Ok(self.index_values()?.into_iter().filter(|v| !v.is_null()).min())
    }

    /// Largest non-null index value, `None` for an empty frame
    pub fn max_index(&self) -> FrameResult<Option<ScalarValue>> {
        Ok(self.index_values()?.into_iter().filter(|v| !v.is_null()).max())
    }

    pub fn index_values(&self) -> FrameResult<Vec<ScalarValue>> {
        ScalarValue::collect(self.index.as_ref())
    }

    /// Distinct index values (the key-set summary of this partition)
    pub fn unique_index(&self) -> FrameResult<BTreeSet<ScalarValue>> {
        Ok(self.index_values()?.into_iter().collect())
    }

    /// Distinct values of one column
    pub fn unique_values(&self, column: &str) -> FrameResult<BTreeSet<ScalarValue>> {
        Ok(ScalarValue::collect(self.column(column)?.as_ref())?.into_iter().collect())
    }

    /// Rows whose index lies in `[lo, hi]`
    ///
    /// Null sorts below every value, so null index rows are kept exactly
    /// when `lo` is null.
    pub fn loc(&self, lo: &ScalarValue, hi: &ScalarValue) -> FrameResult<Frame> {
        let index = ScalarValue::canonical_array(&self.index)?;
        let nulls = is_null(index.as_ref())?;
        let mask = if hi.is_null() || index.data_type() == &DataType::Null {
            if lo.is_null() {
                nulls
            } else {
                BooleanArray::from(vec![false; index.len()])
            }
        } else {
            let upper = lt_eq(&index, &Scalar::new(hi.to_array_of(index.data_type())?))?;
            if lo.is_null() {
                or_kleene(&nulls, &upper)?
            } else {
                let lower = gt_eq(&index, &Scalar::new(lo.to_array_of(index.data_type())?))?;
                and(&lower, &upper)?
            }
        };
        self.filter(&mask)
    }

    /// Rows whose index value is a member of `keys`
    pub fn filter_index_in(&self, keys: &BTreeSet<ScalarValue>) -> FrameResult<Frame> {
        let mask = membership_mask(&self.index, keys)?;
        self.filter(&mask)
    }

    /// Rows whose `column` value is a member of `keys`
    pub fn filter_values_in(&self, column: &str, keys: &BTreeSet<ScalarValue>) -> FrameResult<Frame> {
        let mask = membership_mask(self.column(column)?, keys)?;
        self.filter(&mask)
    }
}

/// Rows of `values` found in `keys`, matched on their row encoding
fn membership_mask(values: &ArrayRef, keys: &BTreeSet<ScalarValue>) -> FrameResult<BooleanArray> {
    if keys.is_empty() {
        return Ok(BooleanArray::from(vec![false; values.len()]));
    }
    let values = ScalarValue::canonical_array(values)?;
    if values.data_type() == &DataType::Null {
        return Ok(BooleanArray::from(vec![keys.contains(&ScalarValue::Null); values.len()]));
    }
    let key_arrays = keys
        .iter()
        .map(|k| k.to_array_of(values.data_type()))
        .collect::<FrameResult<Vec<ArrayRef>>>()?;
    let key_refs: Vec<&dyn Array> = key_arrays.iter().map(|a| a.as_ref()).collect();
    let key_array = arrow::compute::concat(&key_refs)?;

    let converter = RowConverter::new(vec![SortField::new(values.data_type().clone())])?;
    let key_rows = converter.convert_columns(&[key_array])?;
    let lookup: HashSet<&[u8]> = key_rows.iter().map(|r| r.data()).collect();
    let rows = converter.convert_columns(&[values])?;
    Ok(rows.iter().map(|r| Some(lookup.contains(r.as_ref()))).collect())
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index_name", &self.index_name)
            .field("index_type", self.index.data_type())
            .field("rows", &self.num_rows())
            .field("columns", &self.column_names())
            .finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.index_name.as_deref().unwrap_or(DEFAULT_INDEX_NAME);
        let mut fields = vec![Field::new(name, self.index.data_type().clone(), true)];
        let mut columns = vec![self.index.clone()];
        for (field, column) in self.data.schema().fields().iter().zip(self.data.columns()) {
            fields.push(field.as_ref().clone());
            columns.push(column.clone());
        }
        match RecordBatch::try_new(Arc::new(Schema::new(fields)), columns) {
            Ok(batch) => match arrow::util::pretty::pretty_format_batches(&[batch]) {
                Ok(table) => write!(f, "{}", table),
                Err(e) => write!(f, "<unprintable frame: {}>", e),
            },
            Err(e) => write!(f, "<unprintable frame: {}>", e),
        }
    }
}

/// An Int64 array holding `start..start + len`
pub fn range_index(start: i64, len: usize) -> ArrayRef {
    Arc::new(Int64Array::from_iter_values(start..start + len as i64))
}

/// Build a batch, keeping the row count when there are no columns
pub(crate) fn rebuild_batch(schema: SchemaRef, columns: Vec<ArrayRef>, rows: usize) -> FrameResult<RecordBatch> {
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}

fn same_columns(a: &Schema, b: &Schema) -> bool {
    a.fields().len() == b.fields().len()
        && a
            .fields()
            .iter()
            .zip(b.fields().iter())
            .all(|(x, y)| x.name() == y.name() && x.data_type() == y.data_type())
}
