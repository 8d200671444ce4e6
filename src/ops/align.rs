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

//! Division alignment
//!
//! Alignment re-buckets the partitions of index-partitioned tables so that no
//! index value is split across partitions and, for several tables, so that a
//! value present in more than one table lands in partitions with the same
//! position. Decisions are made on key-set summaries (the distinct index
//! values of each partition); rows are only moved by the tasks emitted here.
//!
//! Alignment requires known divisions, which guarantee that partitions can
//! only overlap at their boundary values.

use std::collections::BTreeSet;
use std::ops::Bound;

use crate::error::{Code, FrameError, FrameResult};
use crate::frame::Frame;
use crate::graph::{tokenize, Datum, Task};
use crate::partition::Divisions;
use crate::scalar::ScalarValue;
use crate::table::Table;

pub type KeySet = BTreeSet<ScalarValue>;

/// A re-bucketed table and the key set of each of its partitions
#[derive(Debug, Clone)]
pub struct Aligned {
    pub table: Table,
    pub key_sets: Vec<KeySet>,
}

/// Remove values shared by adjacent key sets until no neighbours intersect
///
/// When two neighbours intersect, the intersection is removed from the
/// larger set (the left one on ties), so the value stays in the smaller one.
/// Empty sets are dropped before and after every pass. Every pass that changes
/// anything removes at least one value, so the loop runs at most
/// `sum(len) + 1` passes.
///
/// A null index value sorts below every other value, so it is taken out of
/// every set and placed in the first one.
pub fn self_align_key_sets(sets: Vec<KeySet>) -> Vec<KeySet> {
    let has_null = sets.iter().any(|s| s.contains(&ScalarValue::Null));
    let mut sets: Vec<KeySet> = sets
        .into_iter()
        .map(|mut s| {
            s.remove(&ScalarValue::Null);
            s
        })
        .filter(|s| !s.is_empty())
        .collect();
    let mut passes = 0;
    loop {
        passes += 1;
        let mut changed = false;
        for i in 0..sets.len().saturating_sub(1) {
            let shared: Vec<ScalarValue> = sets[i].intersection(&sets[i + 1]).cloned().collect();
            if shared.is_empty() {
                continue;
            }
            let loser = if sets[i].len() >= sets[i + 1].len() { i } else { i + 1 };
            for v in &shared {
                sets[loser].remove(v);
            }
            changed = true;
        }
        sets.retain(|s| !s.is_empty());
        if !changed {
            break;
        }
    }
    log::trace!("key sets aligned after {} passes", passes);
    if has_null {
        nulls_to_first(&mut sets);
    }
    sets
}

fn nulls_to_first(buckets: &mut Vec<KeySet>) {
    match buckets.first_mut() {
        Some(first) => {
            first.insert(ScalarValue::Null);
        }
        None => buckets.push(KeySet::from([ScalarValue::Null])),
    }
}

fn require_known(table: &Table) -> FrameResult<()> {
    if !table.known_divisions() {
        return Err(FrameError::new(
            Code::Invalid,
            format!(
                "alignment of {} requires known divisions, call compute_divisions first",
                table.name()
            ),
        ));
    }
    Ok(())
}

/// Build one partition per bucket from the partitions of `table`
///
/// A bucket's partition is the concatenation of every original partition
/// whose key set meets the bucket, each sliced to the bucket's value range.
/// Buckets no original partition meets become empty partitions.
fn rebucket(
    table: &Table,
    label: &str,
    buckets: &[KeySet],
    originals: &[KeySet],
    divisions: Divisions,
) -> FrameResult<Table> {
    let mut tasks = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let (lo, hi) = match (bucket.first(), bucket.last()) {
            (Some(lo), Some(hi)) => (lo.clone(), hi.clone()),
            _ => {
                tasks.push(Task::Const(Datum::Frame(table.meta().clone())));
                continue;
            }
        };
        let deps: Vec<_> = originals
            .iter()
            .enumerate()
            .filter(|(_, orig)| !orig.is_disjoint(bucket))
            .map(|(i, _)| table.key(i))
            .collect();
        if deps.is_empty() {
            tasks.push(Task::Const(Datum::Frame(table.meta().clone())));
            continue;
        }
        tasks.push(Task::apply("take", deps, move |inputs| {
            let slices = inputs
                .iter()
                .map(|d| d.as_frame()?.loc(&lo, &hi))
                .collect::<FrameResult<Vec<Frame>>>()?;
            Ok(Datum::Frame(Frame::concat(&slices)?))
        }));
    }
    let name = format!("{}-{}", label, tokenize(&(label, table.name(), buckets))?);
    Table::from_tasks(
        table.ctx().clone(),
        table.graph(),
        name,
        tasks,
        table.meta().clone(),
        divisions,
    )?
    .with_kind(table.kind())
}

/// Divisions `[min(b_0), ..., min(b_{K-1}), max(b_{K-1})]` of non-empty buckets
fn bucket_divisions(buckets: &[KeySet]) -> FrameResult<Divisions> {
    let mut values = Vec::with_capacity(buckets.len() + 1);
    for b in buckets {
        if let Some(v) = b.first() {
            values.push(v.clone());
        }
    }
    match buckets.last().and_then(|b| b.last()) {
        Some(v) => values.push(v.clone()),
        None => return Ok(Divisions::unknown(buckets.len())),
    }
    Divisions::known(values)
}

/// Values of the last original partition beyond the last bucket
fn tail_extras(originals: &[KeySet], buckets: &[KeySet]) -> KeySet {
    let last = match originals.last() {
        Some(l) => l,
        None => return KeySet::new(),
    };
    match buckets.last().and_then(|b| b.last()) {
        Some(max) => last
            .range::<ScalarValue, _>((Bound::Excluded(max), Bound::Unbounded))
            .cloned()
            .collect(),
        None => last.clone(),
    }
}

/// Align a table with itself so no index value spans two partitions
pub fn align(table: &Table) -> FrameResult<Aligned> {
    let originals = table.key_sets()?;
    if originals.iter().any(|s| !s.is_empty()) {
        require_known(table)?;
    }
    let mut buckets = self_align_key_sets(originals.clone());
    let extras = tail_extras(&originals, &buckets);
    if !extras.is_empty() {
        buckets.push(extras);
    }
    if buckets.is_empty() {
        log::warn!("every partition of {} is empty, nothing to align", table.name());
        return Ok(Aligned {
            table: table.clone(),
            key_sets: originals,
        });
    }
    let divisions = bucket_divisions(&buckets)?;
    log::debug!(
        "aligned {} partitions of {} into {} buckets",
        table.npartitions(),
        table.name(),
        buckets.len()
    );
    let aligned = rebucket(table, "align", &buckets, &originals, divisions)?;
    Ok(Aligned {
        table: aligned,
        key_sets: buckets,
    })
}

/// Re-bucket a table to externally given key sets
///
/// Target keys the table does not hold are ignored and targets left empty
/// are dropped. Values of the table's last partition beyond the last target
/// form an extra trailing bucket, and null index values always go to the
/// first bucket. Other values outside every target are not carried over.
pub fn align_to_key_sets(table: &Table, targets: &[KeySet]) -> FrameResult<Aligned> {
    let originals = table.key_sets()?;
    let all: KeySet = originals.iter().flatten().cloned().collect();
    let mut buckets: Vec<KeySet> = targets
        .iter()
        .map(|t| t.intersection(&all).cloned().collect::<KeySet>())
        .filter(|t| !t.is_empty())
        .collect();
    let extras = tail_extras(&originals, &buckets);
    if !extras.is_empty() {
        buckets.push(extras);
    }
    if all.contains(&ScalarValue::Null) {
        nulls_to_first(&mut buckets);
    }
    let divisions = if buckets.is_empty() {
        Divisions::unknown(0)
    } else {
        bucket_divisions(&buckets)?
    };
    let aligned = rebucket(table, "align-to", &buckets, &originals, divisions)?;
    Ok(Aligned {
        table: aligned,
        key_sets: buckets,
    })
}

/// Align several tables to a common set of partition boundaries
///
/// Each table is self-aligned, then the boundaries become the union of every
/// table's bucket minima. Bucket `k` of every output holds the values in
/// `[m_k, m_{k+1})`, the last bucket being open above, so a value present in
/// several tables lands at the same position in each. A table holding no
/// value of a bucket gets an empty partition there. All outputs share the
/// same divisions.
pub fn align_many(tables: &[Table]) -> FrameResult<Vec<Aligned>> {
    let originals: Vec<Vec<KeySet>> = tables.iter().map(|t| t.key_sets()).collect::<FrameResult<_>>()?;
    for (t, sets) in tables.iter().zip(&originals) {
        if sets.iter().any(|s| !s.is_empty()) {
            require_known(t)?;
        }
    }

    let mut boundaries = BTreeSet::new();
    let mut global_max: Option<ScalarValue> = None;
    for sets in &originals {
        for s in self_align_key_sets(sets.clone()) {
            if let Some(lo) = s.first() {
                boundaries.insert(lo.clone());
            }
            if let Some(hi) = s.last() {
                if global_max.as_ref().map_or(true, |m| hi > m) {
                    global_max = Some(hi.clone());
                }
            }
        }
    }
    let boundaries: Vec<ScalarValue> = boundaries.into_iter().collect();

    let global_max = match global_max {
        Some(m) => m,
        None => {
            log::warn!("all {} tables are empty, nothing to align", tables.len());
            return tables
                .iter()
                .zip(originals)
                .map(|(t, key_sets)| {
                    Ok(Aligned {
                        table: t.clone(),
                        key_sets,
                    })
                })
                .collect();
        }
    };

    let mut division_values = boundaries.clone();
    division_values.push(global_max);
    let divisions = Divisions::known(division_values)?;

    let mut out = Vec::with_capacity(tables.len());
    for (table, sets) in tables.iter().zip(&originals) {
        let all: KeySet = sets.iter().flatten().cloned().collect();
        let buckets: Vec<KeySet> = (0..boundaries.len())
            .map(|k| {
                let lo = Bound::Included(&boundaries[k]);
                let hi = match boundaries.get(k + 1) {
                    Some(next) => Bound::Excluded(next),
                    None => Bound::Unbounded,
                };
                all.range::<ScalarValue, _>((lo, hi)).cloned().collect()
            })
            .collect();
        let aligned = rebucket(table, "align-many", &buckets, sets, divisions.clone())?;
        out.push(Aligned {
            table: aligned,
            key_sets: buckets,
        });
    }
    log::debug!("aligned {} tables to {} common buckets", tables.len(), boundaries.len());
    Ok(out)
}

/// Align two tables to common boundaries
pub fn align_pair(left: &Table, right: &Table) -> FrameResult<(Aligned, Aligned)> {
    let mut aligned = align_many(&[left.clone(), right.clone()])?.into_iter();
    match (aligned.next(), aligned.next()) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(FrameError::new(Code::ExecutionError, "pairwise alignment lost a table")),
    }
}
