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

//! Scalar values
//!
//! A `ScalarValue` is a single owned cell pulled out of an Arrow array. It is
//! totally ordered and hashable so that it can serve as a division boundary,
//! as a member of a key-set summary and as a keyword argument that takes part
//! in task tokenization.
//!
//! All integer widths up to 32 bits (and temporal types) widen to `Int64`,
//! floats widen to `Float64`. Values of different variants order by variant
//! rank; a single index column never mixes variants.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Float64Type, Int64Type, UInt64Type};
use serde::{Deserialize, Serialize};

use crate::error::{Code, FrameError, FrameResult};

/// An owned, totally ordered scalar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    Utf8(String),
}

impl ScalarValue {
    fn rank(&self) -> u8 {
        match self {
            ScalarValue::Null => 0,
            ScalarValue::Boolean(_) => 1,
            ScalarValue::Int64(_) => 2,
            ScalarValue::UInt64(_) => 3,
            ScalarValue::Float64(_) => 4,
            ScalarValue::Utf8(_) => 5,
        }
    }

    /// Convert to f64 if possible
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Null | ScalarValue::Utf8(_) => None,
            ScalarValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            ScalarValue::Int64(v) => Some(*v as f64),
            ScalarValue::UInt64(v) => Some(*v as f64),
            ScalarValue::Float64(v) => Some(*v),
        }
    }

    /// Convert to i64 if possible
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Null | ScalarValue::Utf8(_) => None,
            ScalarValue::Boolean(b) => Some(if *b { 1 } else { 0 }),
            ScalarValue::Int64(v) => Some(*v),
            ScalarValue::UInt64(v) => i64::try_from(*v).ok(),
            ScalarValue::Float64(v) => Some(*v as i64),
        }
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Arrow type this scalar materializes as
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::UInt64(_) => DataType::UInt64,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) => DataType::Utf8,
        }
    }

    /// Build a single-element array holding this value
    pub fn to_array(&self) -> ArrayRef {
        match self {
            ScalarValue::Null => arrow::array::new_null_array(&DataType::Null, 1),
            ScalarValue::Boolean(v) => Arc::new(BooleanArray::from(vec![*v])),
            ScalarValue::Int64(v) => Arc::new(Int64Array::from(vec![*v])),
            ScalarValue::UInt64(v) => Arc::new(UInt64Array::from(vec![*v])),
            ScalarValue::Float64(v) => Arc::new(Float64Array::from(vec![*v])),
            ScalarValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str()])),
        }
    }

    /// Cast `array` to the type its scalars are read as
    pub fn canonical_array(array: &ArrayRef) -> FrameResult<ArrayRef> {
        let target = match array.data_type() {
            DataType::Float32 | DataType::Float16 => DataType::Float64,
            DataType::LargeUtf8 => DataType::Utf8,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::Date32
            | DataType::Date64
            | DataType::Time32(_)
            | DataType::Time64(_)
            | DataType::Timestamp(_, _)
            | DataType::Duration(_) => DataType::Int64,
            _ => return Ok(array.clone()),
        };
        Ok(arrow::compute::cast(array, &target)?)
    }

    /// A one-element array of `data_type` holding this value
    pub fn to_array_of(&self, data_type: &DataType) -> FrameResult<ArrayRef> {
        let array = self.to_array();
        if array.data_type() == data_type {
            return Ok(array);
        }
        Ok(arrow::compute::cast(&array, data_type)?)
    }

    /// Read the value at `index` of `array`
    pub fn from_array(array: &dyn Array, index: usize) -> FrameResult<ScalarValue> {
        if index >= array.len() {
            return Err(FrameError::new(
                Code::IndexError,
                format!("index {} out of bounds for array of length {}", index, array.len()),
            ));
        }
        let single = array.slice(index, 1);
        let mut values = Self::collect(single.as_ref())?;
        Ok(values.pop().unwrap_or(ScalarValue::Null))
    }

    /// Read every value of `array`, downcasting once
    pub fn collect(array: &dyn Array) -> FrameResult<Vec<ScalarValue>> {
        let len = array.len();
        let values = match array.data_type() {
            DataType::Null => vec![ScalarValue::Null; len],
            DataType::Boolean => {
                let arr = array.as_boolean();
                (0..len)
                    .map(|i| if arr.is_null(i) { ScalarValue::Null } else { ScalarValue::Boolean(arr.value(i)) })
                    .collect()
            }
            DataType::Int64 => {
                let arr = array.as_primitive::<Int64Type>();
                (0..len)
                    .map(|i| if arr.is_null(i) { ScalarValue::Null } else { ScalarValue::Int64(arr.value(i)) })
                    .collect()
            }
            DataType::UInt64 => {
                let arr = array.as_primitive::<UInt64Type>();
                (0..len)
                    .map(|i| if arr.is_null(i) { ScalarValue::Null } else { ScalarValue::UInt64(arr.value(i)) })
                    .collect()
            }
            DataType::Float64 => {
                let arr = array.as_primitive::<Float64Type>();
                (0..len)
                    .map(|i| if arr.is_null(i) { ScalarValue::Null } else { ScalarValue::Float64(arr.value(i)) })
                    .collect()
            }
            DataType::Float32 | DataType::Float16 => {
                let widened = arrow::compute::cast(array, &DataType::Float64)?;
                return Self::collect(widened.as_ref());
            }
            DataType::Utf8 => {
                let arr = array.as_string::<i32>();
                (0..len)
                    .map(|i| if arr.is_null(i) { ScalarValue::Null } else { ScalarValue::Utf8(arr.value(i).to_string()) })
                    .collect()
            }
            DataType::LargeUtf8 => {
                let arr = array.as_string::<i64>();
                (0..len)
                    .map(|i| if arr.is_null(i) { ScalarValue::Null } else { ScalarValue::Utf8(arr.value(i).to_string()) })
                    .collect()
            }
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::Date32
            | DataType::Date64
            | DataType::Time32(_)
            | DataType::Time64(_)
            | DataType::Timestamp(_, _)
            | DataType::Duration(_) => {
                let widened = arrow::compute::cast(array, &DataType::Int64)?;
                return Self::collect(widened.as_ref());
            }
            other => {
                return Err(FrameError::new(
                    Code::NotImplemented,
                    format!("scalar extraction not implemented for type: {:?}", other),
                ))
            }
        };
        Ok(values)
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarValue {}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ScalarValue::Null, ScalarValue::Null) => Ordering::Equal,
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a.cmp(b),
            (ScalarValue::Int64(a), ScalarValue::Int64(b)) => a.cmp(b),
            (ScalarValue::UInt64(a), ScalarValue::UInt64(b)) => a.cmp(b),
            // total_cmp is Equal exactly when the bit patterns match, which keeps Hash consistent
            (ScalarValue::Float64(a), ScalarValue::Float64(b)) => a.total_cmp(b),
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            ScalarValue::Null => {}
            ScalarValue::Boolean(v) => v.hash(state),
            ScalarValue::Int64(v) => v.hash(state),
            ScalarValue::UInt64(v) => v.hash(state),
            ScalarValue::Float64(v) => v.to_bits().hash(state),
            ScalarValue::Utf8(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "null"),
            ScalarValue::Boolean(v) => write!(f, "{}", v),
            ScalarValue::Int64(v) => write!(f, "{}", v),
            ScalarValue::UInt64(v) => write!(f, "{}", v),
            ScalarValue::Float64(v) => write!(f, "{}", v),
            ScalarValue::Utf8(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int64(v as i64)
    }
}

impl From<u64> for ScalarValue {
    fn from(v: u64) -> Self {
        ScalarValue::UInt64(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float64(v)
    }
}

impl From<f32> for ScalarValue {
    fn from(v: f32) -> Self {
        ScalarValue::Float64(v as f64)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Boolean(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Utf8(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Utf8(v)
    }
}
