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

//! Distributed sort over partitions
//!
//! Network sort: partitions are sorted locally, then merged pairwise along
//! Batcher's odd-even merge network, `O(N log^2 N)` merge-split steps for `N`
//! partitions. No step looks at more than two partitions.
//!
//! Binned sort: a network sort followed by moving every run of equal keys
//! that crosses a partition boundary into the earliest partition holding it.

use std::collections::BTreeSet;

use crate::error::{Code, FrameError, FrameResult};
use crate::frame::Frame;
use crate::graph::{tokenize, Datum, GraphBuilder, Task, TaskKey};
use crate::partition::Divisions;
use crate::scalar::ScalarValue;
use crate::table::Table;

/// Comparators `(low, high)` of Batcher's odd-even merge sort over `n` slots
///
/// The network is built for the next power of two; comparators touching a
/// slot `>= n` are left out.
pub fn batcher_network(n: usize) -> Vec<(usize, usize)> {
    let size = n.next_power_of_two();
    let mut comparators = Vec::new();
    let mut p = 1;
    while p < size {
        let mut k = p;
        while k >= 1 {
            let mut j = k % p;
            while j + k < size {
                for i in 0..k.min(size - j - k) {
                    let a = i + j;
                    let b = i + j + k;
                    if a / (2 * p) == b / (2 * p) && b < n {
                        comparators.push((a, b));
                    }
                }
                j += 2 * k;
            }
            k /= 2;
        }
        p *= 2;
    }
    comparators
}

/// Where a slot's current rows live: a task result or one half of it
#[derive(Clone)]
struct Slot {
    key: TaskKey,
    half: Option<usize>,
}

fn resolve<'a>(datum: &'a Datum, half: Option<usize>) -> FrameResult<&'a Frame> {
    match half {
        None => datum.as_frame(),
        Some(h) => datum
            .as_list()?
            .get(h)
            .ok_or_else(|| FrameError::new(Code::IndexError, format!("merge-split has no half {}", h)))?
            .as_frame(),
    }
}

/// Sort the union of two frames by `by`; the low half gets `capacity` rows
fn merge_split(low: &Frame, high: &Frame, by: &str, capacity: usize) -> FrameResult<Datum> {
    let merged = Frame::concat(&[low.clone(), high.clone()])?.sort_values(by)?;
    let cut = capacity.min(merged.num_rows());
    Ok(Datum::List(vec![
        Datum::Frame(merged.slice(0, cut)),
        Datum::Frame(merged.slice(cut, merged.num_rows() - cut)),
    ]))
}

/// Sort a table by the values of column `by`
///
/// Empty partitions are dropped first. Each merge-split step keeps the
/// largest input partition size as the size of its low output, so every
/// output partition but the last non-empty one is full and trailing empty
/// partitions are dropped. Unless `ignore_index` is set the index is then
/// reset to a dense global range, giving known divisions.
pub fn sort_values(table: &Table, by: &str, ignore_index: bool) -> FrameResult<Table> {
    table.meta().column(by)?;
    let sizes = table.partition_sizes()?;
    let keep: Vec<usize> = (0..sizes.len()).filter(|&i| sizes[i] > 0).collect();
    if keep.is_empty() {
        log::warn!("sorting {} which has no rows", table.name());
        return table.reset_index(!ignore_index);
    }
    let n = keep.len();
    let capacity = keep.iter().map(|&i| sizes[i]).max().unwrap_or(0);
    let total: usize = sizes.iter().sum();

    let token = tokenize(&("sort-values", table.name(), by))?;
    let local_name = format!("sort-local-{}", token);
    let network_name = format!("sort-network-{}", token);
    let out_name = format!("sort-values-{}", token);

    let mut builder = GraphBuilder::new(table.graph());
    let mut slots = Vec::with_capacity(n);
    for (slot, &i) in keep.iter().enumerate() {
        let column = by.to_string();
        let key = TaskKey::new(local_name.clone(), slot);
        builder.insert(
            key.clone(),
            Task::apply("sort-local", vec![table.key(i)], move |inputs| {
                Ok(Datum::Frame(inputs[0].as_frame()?.sort_values(&column)?))
            }),
        );
        slots.push(Slot { key, half: None });
    }

    let network = batcher_network(n);
    for (step, &(a, b)) in network.iter().enumerate() {
        let (low, high) = (slots[a].clone(), slots[b].clone());
        let column = by.to_string();
        let key = TaskKey::with_path(network_name.clone(), vec![step]);
        builder.insert(
            key.clone(),
            Task::apply("merge-split", vec![low.key.clone(), high.key.clone()], move |inputs| {
                let l = resolve(&inputs[0], low.half)?;
                let h = resolve(&inputs[1], high.half)?;
                merge_split(l, h, &column, capacity)
            }),
        );
        slots[a] = Slot {
            key: key.clone(),
            half: Some(0),
        };
        slots[b] = Slot { key, half: Some(1) };
    }

    let nonempty = total.div_ceil(capacity);
    let mut out_sizes = Vec::with_capacity(nonempty);
    for (i, slot) in slots.into_iter().take(nonempty).enumerate() {
        out_sizes.push(capacity.min(total - i * capacity));
        builder.insert(
            TaskKey::new(out_name.clone(), i),
            Task::apply("sorted", vec![slot.key], move |inputs| {
                Ok(Datum::Frame(resolve(&inputs[0], slot.half)?.clone()))
            }),
        );
    }
    log::debug!(
        "network sort of {} by '{}': {} partitions, {} merge-split steps, {} outputs",
        table.name(),
        by,
        n,
        network.len(),
        nonempty
    );

    let sorted = Table::new(
        table.ctx().clone(),
        builder.build(),
        out_name,
        table.meta().clone(),
        Divisions::unknown(nonempty),
    )?
    .with_kind(table.kind())?;
    if ignore_index {
        sorted.reset_index(false)
    } else {
        sorted.reset_index_with_sizes(&out_sizes)
    }
}

/// Sort by `by` so that no value of `by` spans two partitions
///
/// Runs of a value crossing a boundary are pulled into the earliest partition
/// holding it. Partitions left with no values of their own are dropped. The
/// index is reset to a dense global range.
pub fn sort_values_binned(table: &Table, by: &str) -> FrameResult<Table> {
    let sorted = sort_values(table, by, false)?;
    let column = by.to_string();
    let mut uniques: Vec<BTreeSet<ScalarValue>> = sorted
        .evaluate_partitions("unique-values", move |f| Ok(Datum::KeySet(f.unique_values(&column)?)))?
        .iter()
        .map(|d| d.as_key_set().cloned())
        .collect::<FrameResult<_>>()?;

    // pass 1: which later partitions each partition pulls keys from
    let mut pulls: Vec<Vec<(usize, BTreeSet<ScalarValue>)>> = vec![Vec::new(); uniques.len()];
    for i in 0..uniques.len() {
        for j in i + 1..uniques.len() {
            let shared: BTreeSet<ScalarValue> = uniques[i].intersection(&uniques[j]).cloned().collect();
            if shared.is_empty() {
                break;
            }
            for v in &shared {
                uniques[j].remove(v);
            }
            pulls[i].push((j, shared));
        }
    }

    // pass 2: keep own keys, append pulled rows
    let name = format!("sort-binned-{}", tokenize(&("sort-binned", sorted.name(), by))?);
    let mut builder = GraphBuilder::new(sorted.graph());
    let mut npartitions = 0;
    for (i, keep) in uniques.into_iter().enumerate() {
        if keep.is_empty() {
            continue;
        }
        let pulled = std::mem::take(&mut pulls[i]);
        let mut deps = vec![sorted.key(i)];
        deps.extend(pulled.iter().map(|(j, _)| sorted.key(*j)));
        let pulled_keys: Vec<BTreeSet<ScalarValue>> = pulled.into_iter().map(|(_, keys)| keys).collect();
        let column = by.to_string();
        builder.insert(
            TaskKey::new(name.clone(), npartitions),
            Task::apply("bin", deps, move |inputs| {
                let mut parts = vec![inputs[0].as_frame()?.filter_values_in(&column, &keep)?];
                for (d, keys) in inputs[1..].iter().zip(&pulled_keys) {
                    parts.push(d.as_frame()?.filter_values_in(&column, keys)?);
                }
                Ok(Datum::Frame(Frame::concat(&parts)?))
            }),
        );
        npartitions += 1;
    }
    log::debug!(
        "binned sort of {} by '{}' kept {} of {} partitions",
        table.name(),
        by,
        npartitions,
        sorted.npartitions()
    );

    Table::new(
        sorted.ctx().clone(),
        builder.build(),
        name,
        sorted.meta().clone(),
        Divisions::unknown(npartitions),
    )?
    .with_kind(sorted.kind())?
    .reset_index(true)
}

impl Table {
    /// Network sort by one column; see [`sort_values`]
    pub fn sort_values(&self, by: &str, ignore_index: bool) -> FrameResult<Table> {
        sort_values(self, by, ignore_index)
    }

    /// Sort keeping equal values of `by` in one partition
    pub fn sort_values_binned(&self, by: &str) -> FrameResult<Table> {
        sort_values_binned(self, by)
    }
}
