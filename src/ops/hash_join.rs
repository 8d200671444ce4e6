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

//! Join on key columns
//!
//! Both tables are shuffled by hashing their key columns into the same number
//! of buckets, so rows with equal keys meet in buckets with the same position,
//! then each bucket pair is merged locally.

use crate::error::{Code, FrameError, FrameResult};
use crate::frame::{Frame, JoinHow, JoinSuffixes};
use crate::graph::{tokenize, Datum, GraphBuilder, Task, TaskKey};
use crate::partition::{hash_partition, Divisions};
use crate::table::Table;

/// Shuffle a table into `buckets` partitions by the hash of `on`
///
/// Adds two layers to `builder`: one task per input partition splitting it
/// into buckets, and one task per bucket gathering its pieces. Returns the
/// name of the bucket layer.
fn shuffle(builder: &mut GraphBuilder, table: &Table, on: &[String], buckets: usize) -> FrameResult<String> {
    let token = tokenize(&(table.name(), on, buckets))?;
    let split_name = format!("hash-split-{}", token);
    let gather_name = format!("hash-shuffle-{}", token);

    for i in 0..table.npartitions() {
        let on = on.to_vec();
        builder.insert(
            TaskKey::new(split_name.clone(), i),
            Task::apply("hash-split", vec![table.key(i)], move |inputs| {
                let parts = hash_partition(inputs[0].as_frame()?, &on, buckets)?;
                Ok(Datum::List(parts.into_iter().map(Datum::Frame).collect()))
            }),
        );
    }

    for b in 0..buckets {
        let deps: Vec<TaskKey> = (0..table.npartitions())
            .map(|i| TaskKey::new(split_name.clone(), i))
            .collect();
        let meta = table.meta().clone();
        builder.insert(
            TaskKey::new(gather_name.clone(), b),
            Task::apply("hash-shuffle", deps, move |inputs| {
                let pieces = inputs
                    .iter()
                    .map(|d| {
                        d.as_list()?
                            .get(b)
                            .ok_or_else(|| FrameError::new(Code::IndexError, format!("missing bucket {}", b)))?
                            .as_frame()
                            .cloned()
                    })
                    .collect::<FrameResult<Vec<Frame>>>()?;
                if pieces.is_empty() {
                    return Ok(Datum::Frame(meta.clone()));
                }
                Ok(Datum::Frame(Frame::concat(&pieces)?))
            }),
        );
    }
    Ok(gather_name)
}

/// Join two tables on equally named key columns
///
/// Key columns must exist on both sides with equal types. Both sides are
/// shuffled into `max(npartitions)` buckets. The output has a range index per
/// partition and unknown divisions.
pub fn hash_join(
    left: &Table,
    right: &Table,
    on: &[String],
    how: JoinHow,
    suffixes: &JoinSuffixes,
) -> FrameResult<Table> {
    let meta = left.meta().merge_on(right.meta(), on, how, suffixes)?;
    let buckets = left.npartitions().max(right.npartitions()).max(1);

    let mut builder = GraphBuilder::new(left.graph());
    builder.merge(right.graph());
    let left_buckets = shuffle(&mut builder, left, on, buckets)?;
    let right_buckets = shuffle(&mut builder, right, on, buckets)?;

    let name = format!(
        "merge-{}",
        tokenize(&(&left_buckets, &right_buckets, on, how.as_str(), &suffixes.left, &suffixes.right))?
    );
    for b in 0..buckets {
        let on = on.to_vec();
        let suffixes = suffixes.clone();
        builder.insert(
            TaskKey::new(name.clone(), b),
            Task::apply(
                "merge",
                vec![TaskKey::new(left_buckets.clone(), b), TaskKey::new(right_buckets.clone(), b)],
                move |inputs| {
                    let merged = inputs[0].as_frame()?.merge_on(inputs[1].as_frame()?, &on, how, &suffixes)?;
                    Ok(Datum::Frame(merged))
                },
            ),
        );
    }
    log::debug!(
        "{} merge of {} and {} on {:?} through {} hash buckets",
        how,
        left.name(),
        right.name(),
        on,
        buckets
    );
    Table::new(left.ctx().clone(), builder.build(), name, meta, Divisions::unknown(buckets))
}
