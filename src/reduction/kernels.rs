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

//! Series aggregations built on the tree reduction
//!
//! Intermediate results per aggregation:
//! - count, sum, min, max: one scalar
//! - mean: a sum and a count, divided after both reductions
//! - var, std: a list `[sum_of_squares, sum, count]`
//! - unique_k, nlargest, nsmallest: a frame

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, UInt64Array};
use arrow::compute::SortOptions;
use arrow::datatypes::DataType;

use crate::error::{Code, FrameError, FrameResult};
use crate::frame::{range_index, Frame};
use crate::graph::Datum;
use crate::reduction::{reduction, Arg, Kwargs, Reducer, ReductionOptions, SplitEvery};
use crate::scalar::ScalarValue;
use crate::table::{LazyScalar, Table, TableKind};

/// Finish a variance from its intermediate sums
///
/// Returns NaN when there are no values or no degrees of freedom left.
pub fn var_aggregate(x2: f64, x: f64, n: i64, ddof: i64) -> f64 {
    if n == 0 || n <= ddof {
        return f64::NAN;
    }
    let n = n as f64;
    let mut result = (x2 / n) - (x / n).powi(2);
    if ddof != 0 {
        result = result * n / (n - ddof as f64);
    }
    result
}

/// The values a Series or Index aggregates over
fn series_values(frame: &Frame) -> FrameResult<ArrayRef> {
    match frame.num_columns() {
        1 => Ok(frame.data().column(0).clone()),
        0 => Ok(frame.index().clone()),
        n => Err(FrameError::new(
            Code::TypeError,
            format!("expected a Series or an Index, got {} columns", n),
        )),
    }
}

fn first_frame(inputs: &[Datum]) -> FrameResult<&Frame> {
    inputs
        .first()
        .ok_or_else(|| FrameError::new(Code::Invalid, "chunk called without a partition"))?
        .as_frame()
}

fn sum_array(values: &dyn Array) -> FrameResult<ScalarValue> {
    let total = match values.data_type() {
        DataType::Null => ScalarValue::Null,
        DataType::UInt64 => {
            let arr = values
                .as_any()
                .downcast_ref::<UInt64Array>()
                .ok_or_else(|| FrameError::new(Code::TypeError, "expected a UInt64 array"))?;
            arrow::compute::sum(arr).map(ScalarValue::UInt64).unwrap_or(ScalarValue::Null)
        }
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 | DataType::UInt8 | DataType::UInt16
        | DataType::UInt32 => {
            let cast = arrow::compute::cast(values, &DataType::Int64)?;
            let arr = cast
                .as_any()
                .downcast_ref::<arrow::array::Int64Array>()
                .ok_or_else(|| FrameError::new(Code::TypeError, "expected an Int64 array"))?;
            arrow::compute::sum(arr).map(ScalarValue::Int64).unwrap_or(ScalarValue::Null)
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let cast = arrow::compute::cast(values, &DataType::Float64)?;
            let arr = cast
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| FrameError::new(Code::TypeError, "expected a Float64 array"))?;
            arrow::compute::sum(arr).map(ScalarValue::Float64).unwrap_or(ScalarValue::Null)
        }
        other => {
            return Err(FrameError::new(
                Code::TypeError,
                format!("sum is not supported for type {}", other),
            ))
        }
    };
    Ok(total)
}

/// Add two partial sums; nulls are skipped
fn add(a: &ScalarValue, b: &ScalarValue) -> FrameResult<ScalarValue> {
    Ok(match (a, b) {
        (ScalarValue::Null, v) | (v, ScalarValue::Null) => v.clone(),
        (ScalarValue::Int64(x), ScalarValue::Int64(y)) => ScalarValue::Int64(x.wrapping_add(*y)),
        (ScalarValue::UInt64(x), ScalarValue::UInt64(y)) => ScalarValue::UInt64(x.wrapping_add(*y)),
        (x, y) => match (x.to_f64(), y.to_f64()) {
            (Some(x), Some(y)) => ScalarValue::Float64(x + y),
            _ => {
                return Err(FrameError::new(
                    Code::TypeError,
                    format!("cannot add {} and {}", x, y),
                ))
            }
        },
    })
}

fn sum_scalars(inputs: &[Datum]) -> FrameResult<ScalarValue> {
    inputs
        .iter()
        .try_fold(ScalarValue::Null, |acc, d| add(&acc, d.as_scalar()?))
}

/// `[sum_of_squares, sum, count]` of the non-null values as floats
fn moments(values: &dyn Array) -> FrameResult<Datum> {
    let cast = arrow::compute::cast(values, &DataType::Float64)?;
    let arr = cast
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| FrameError::new(Code::TypeError, "expected a Float64 array"))?;
    let (mut x2, mut x, mut n) = (0.0, 0.0, 0i64);
    for v in arr.iter().flatten() {
        x2 += v * v;
        x += v;
        n += 1;
    }
    Ok(Datum::List(vec![
        Datum::Scalar(ScalarValue::Float64(x2)),
        Datum::Scalar(ScalarValue::Float64(x)),
        Datum::Scalar(ScalarValue::Int64(n)),
    ]))
}

fn combine_moments(inputs: &[Datum]) -> FrameResult<(f64, f64, i64)> {
    let (mut x2, mut x, mut n) = (0.0, 0.0, 0i64);
    for d in inputs {
        match d.as_list()? {
            [a, b, c] => {
                x2 += a.as_scalar()?.to_f64().unwrap_or(0.0);
                x += b.as_scalar()?.to_f64().unwrap_or(0.0);
                n += c.as_scalar()?.to_i64().unwrap_or(0);
            }
            other => {
                return Err(FrameError::new(
                    Code::Invalid,
                    format!("expected 3 intermediate moments, got {}", other.len()),
                ))
            }
        }
    }
    Ok((x2, x, n))
}

/// The `n` first rows ordered by value, nulls last
fn top_n(frame: &Frame, n: usize, descending: bool) -> FrameResult<Frame> {
    let values = series_values(frame)?;
    let options = SortOptions {
        descending,
        nulls_first: false,
    };
    let limit = n.min(frame.num_rows());
    let indices = arrow::compute::sort_to_indices(values.as_ref(), Some(options), Some(limit))?;
    frame.take(&indices)
}

fn concat_frames(inputs: &[Datum]) -> FrameResult<Frame> {
    let frames: Vec<Frame> = inputs
        .iter()
        .map(|d| d.as_frame().cloned())
        .collect::<FrameResult<_>>()?;
    Frame::concat(&frames)
}

fn usize_kwarg(kwargs: &Kwargs, key: &str) -> FrameResult<usize> {
    kwargs
        .get(key)
        .and_then(ScalarValue::to_i64)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| FrameError::new(Code::Invalid, format!("missing non-negative integer argument '{}'", key)))
}

/// Distinct values as a one-column frame, failing when there are more than `k`
fn unique_k_frame(frame: &Frame, k: usize) -> FrameResult<Frame> {
    let values = series_values(frame)?;
    let sorted = arrow::compute::sort(values.as_ref(), None)?;
    let distinct: Vec<u64> = {
        let scalars = ScalarValue::collect(sorted.as_ref())?;
        (0..scalars.len())
            .filter(|&i| i == 0 || scalars[i] != scalars[i - 1])
            .map(|i| i as u64)
            .collect()
    };
    if distinct.len() > k {
        return Err(FrameError::new(
            Code::Invalid,
            format!("found {} unique values, more than k = {}", distinct.len(), k),
        ));
    }
    let unique = arrow::compute::take(sorted.as_ref(), &UInt64Array::from(distinct), None)?;
    let name = frame
        .column_names()
        .into_iter()
        .next()
        .or_else(|| frame.index_name().map(str::to_string))
        .unwrap_or_else(|| "values".to_string());
    let schema = Arc::new(arrow::datatypes::Schema::new(vec![arrow::datatypes::Field::new(
        name,
        unique.data_type().clone(),
        true,
    )]));
    let rows = unique.len();
    let batch = crate::frame::rebuild_batch(schema, vec![unique], rows)?;
    Frame::new(range_index(0, rows), batch)
}

impl Table {
    fn check_series(&self, operation: &str) -> FrameResult<()> {
        match self.kind() {
            TableKind::Series | TableKind::Index => Ok(()),
            TableKind::DataFrame => Err(FrameError::new(
                Code::TypeError,
                format!("{} is only defined for a Series or an Index", operation),
            )),
        }
    }

    /// Number of non-null values
    pub fn count(&self, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        self.check_series("count")?;
        let chunk = Reducer::new("count", |inputs, _| {
            let values = series_values(first_frame(inputs)?)?;
            Ok(Datum::Scalar(ScalarValue::Int64((values.len() - values.null_count()) as i64)))
        });
        let aggregate = Reducer::new("sum", |inputs, _| {
            Ok(Datum::Scalar(match sum_scalars(inputs)? {
                ScalarValue::Null => ScalarValue::Int64(0),
                v => v,
            }))
        });
        let options = ReductionOptions::default().split_every(split_every);
        reduction(&[Arg::Table(self.clone())], &chunk, &aggregate, None, &options)
    }

    /// Sum of the non-null values, null when there are none
    pub fn sum(&self, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        self.check_series("sum")?;
        let chunk = Reducer::new("sum-chunk", |inputs, _| {
            Ok(Datum::Scalar(sum_array(series_values(first_frame(inputs)?)?.as_ref())?))
        });
        let aggregate = Reducer::new("sum", |inputs, _| Ok(Datum::Scalar(sum_scalars(inputs)?)));
        let options = ReductionOptions::default().split_every(split_every);
        reduction(&[Arg::Table(self.clone())], &chunk, &aggregate, None, &options)
    }

    pub fn min(&self, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        self.extremum("min", false, split_every)
    }

    pub fn max(&self, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        self.extremum("max", true, split_every)
    }

    fn extremum(&self, name: &'static str, largest: bool, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        self.check_series(name)?;
        let pick = move |values: Vec<ScalarValue>| {
            let present = values.into_iter().filter(|v| !v.is_null());
            let best = if largest { present.max() } else { present.min() };
            best.unwrap_or(ScalarValue::Null)
        };
        let chunk = Reducer::new(format!("{}-chunk", name), move |inputs, _| {
            let values = series_values(first_frame(inputs)?)?;
            Ok(Datum::Scalar(pick(ScalarValue::collect(values.as_ref())?)))
        });
        let aggregate = Reducer::new(name, move |inputs, _| {
            let values = inputs
                .iter()
                .map(|d| d.as_scalar().cloned())
                .collect::<FrameResult<Vec<_>>>()?;
            Ok(Datum::Scalar(pick(values)))
        });
        let options = ReductionOptions::default().split_every(split_every);
        reduction(&[Arg::Table(self.clone())], &chunk, &aggregate, None, &options)
    }

    /// Sum divided by count; NaN when there are no values
    pub fn mean(&self, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        let sum = self.sum(split_every)?;
        let count = self.count(split_every)?;
        sum.zip_with(&count, "mean", |s, n| {
            let n = n.as_scalar()?.to_f64().unwrap_or(0.0);
            let s = s.as_scalar()?.to_f64().unwrap_or(0.0);
            Ok(Datum::Scalar(ScalarValue::Float64(if n == 0.0 { f64::NAN } else { s / n })))
        })
    }

    /// Variance with `ddof` delta degrees of freedom
    pub fn var(&self, ddof: i64, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        self.moments_reduction("var", ddof, split_every, |v| v)
    }

    /// Standard deviation with `ddof` delta degrees of freedom
    pub fn std(&self, ddof: i64, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        self.moments_reduction("std", ddof, split_every, f64::sqrt)
    }

    fn moments_reduction(
        &self,
        name: &'static str,
        ddof: i64,
        split_every: SplitEvery,
        finish: fn(f64) -> f64,
    ) -> FrameResult<LazyScalar> {
        self.check_series(name)?;
        let chunk = Reducer::new("moments", |inputs, _| moments(series_values(first_frame(inputs)?)?.as_ref()));
        let combine = Reducer::new("moments-combine", |inputs, _| {
            let (x2, x, n) = combine_moments(inputs)?;
            Ok(Datum::List(vec![
                Datum::Scalar(ScalarValue::Float64(x2)),
                Datum::Scalar(ScalarValue::Float64(x)),
                Datum::Scalar(ScalarValue::Int64(n)),
            ]))
        });
        let aggregate = Reducer::new(name, move |inputs, kwargs| {
            let ddof = kwargs.get("ddof").and_then(ScalarValue::to_i64).unwrap_or(1);
            let (x2, x, n) = combine_moments(inputs)?;
            Ok(Datum::Scalar(ScalarValue::Float64(finish(var_aggregate(x2, x, n, ddof)))))
        });
        let options = ReductionOptions::default()
            .split_every(split_every)
            .kwarg("ddof", ddof);
        reduction(&[Arg::Table(self.clone())], &chunk, &aggregate, Some(&combine), &options)
    }

    /// Distinct values, failing when there are more than `k`
    pub fn unique_k(&self, k: usize, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        self.check_series("unique_k")?;
        let chunk = Reducer::new("unique-k-chunk", |inputs, kwargs| {
            Ok(Datum::Frame(unique_k_frame(first_frame(inputs)?, usize_kwarg(kwargs, "k")?)?))
        });
        let aggregate = Reducer::new("unique-k-agg", |inputs, kwargs| {
            Ok(Datum::Frame(unique_k_frame(&concat_frames(inputs)?, usize_kwarg(kwargs, "k")?)?))
        });
        let options = ReductionOptions::default()
            .split_every(split_every)
            .token("unique-k")
            .kwarg("k", k as u64);
        reduction(&[Arg::Table(self.clone())], &chunk, &aggregate, None, &options)
    }

    /// The `n` rows with the largest values, in descending order
    pub fn nlargest(&self, n: usize, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        self.top("nlargest", n, true, split_every)
    }

    /// The `n` rows with the smallest values, in ascending order
    pub fn nsmallest(&self, n: usize, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        self.top("nsmallest", n, false, split_every)
    }

    fn top(&self, name: &'static str, n: usize, descending: bool, split_every: SplitEvery) -> FrameResult<LazyScalar> {
        self.check_series(name)?;
        let chunk = Reducer::new(format!("{}-chunk", name), move |inputs, kwargs| {
            Ok(Datum::Frame(top_n(first_frame(inputs)?, usize_kwarg(kwargs, "n")?, descending)?))
        });
        let aggregate = Reducer::new(format!("{}-agg", name), move |inputs, kwargs| {
            Ok(Datum::Frame(top_n(&concat_frames(inputs)?, usize_kwarg(kwargs, "n")?, descending)?))
        });
        let options = ReductionOptions::default()
            .split_every(split_every)
            .token(name)
            .kwarg("n", n as u64);
        reduction(&[Arg::Table(self.clone())], &chunk, &aggregate, None, &options)
    }
}
