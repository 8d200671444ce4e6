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

//! Hash-based partitioning of a frame

use std::hash::{BuildHasher, Hash, Hasher};

use ahash::RandomState;
use arrow::array::{Array, ArrayRef, UInt64Array};
use arrow_row::{RowConverter, SortField};

use crate::error::{Code, FrameError, FrameResult};
use crate::frame::Frame;

// Fixed seeds: equal keys must land in the same bucket in every partition
const SEEDS: (u64, u64, u64, u64) = (
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

/// Hash Partition - split a frame into `num_partitions` frames by key columns
///
/// Each row goes to `hash(keys) % num_partitions`. The hash is computed on the
/// `arrow_row` encoding of the key columns, so it only depends on the key
/// values and their types. Rows keep their relative order within a bucket.
///
/// # Arguments
/// * `frame` - Frame to partition
/// * `columns` - Names of the key columns
/// * `num_partitions` - Number of buckets
///
/// # Returns
/// One frame per bucket, empty buckets included
pub fn hash_partition(frame: &Frame, columns: &[String], num_partitions: usize) -> FrameResult<Vec<Frame>> {
    if columns.is_empty() {
        return Err(FrameError::new(Code::Invalid, "hash columns cannot be empty"));
    }
    if num_partitions == 0 {
        return Err(FrameError::new(Code::Invalid, "num_partitions must be > 0"));
    }

    let keys: Vec<ArrayRef> = columns
        .iter()
        .map(|c| frame.column(c).cloned())
        .collect::<FrameResult<_>>()?;
    let fields = keys.iter().map(|k| SortField::new(k.data_type().clone())).collect();
    let converter = RowConverter::new(fields)?;
    let rows = converter.convert_columns(&keys)?;

    let state = RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3);
    let mut targets: Vec<Vec<u64>> = vec![Vec::new(); num_partitions];
    for i in 0..rows.num_rows() {
        let mut hasher = state.build_hasher();
        rows.row(i).as_ref().hash(&mut hasher);
        let bucket = (hasher.finish() % num_partitions as u64) as usize;
        targets[bucket].push(i as u64);
    }

    targets
        .into_iter()
        .map(|indices| {
            if indices.is_empty() {
                Ok(frame.empty_like())
            } else {
                frame.take(&UInt64Array::from(indices))
            }
        })
        .collect()
}
