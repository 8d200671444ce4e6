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

//! Concatenation of tables along the index

use std::sync::Arc;

use crate::ctx::FrameContext;
use crate::error::{Code, FrameError, FrameResult};
use crate::frame::Frame;
use crate::graph::{tokenize, Datum, GraphBuilder, Task, TaskKey};
use crate::ops::align::align_many;
use crate::partition::Divisions;
use crate::table::{Table, TableSource};

fn concat_meta(tables: &[Table]) -> FrameResult<Frame> {
    let metas: Vec<Frame> = tables.iter().map(|t| t.meta().clone()).collect();
    Frame::concat(&metas)
}

fn concat_token(label: &str, tables: &[Table]) -> FrameResult<String> {
    let names: Vec<&str> = tables.iter().map(Table::name).collect();
    Ok(format!("{}-{}", label, tokenize(&(label, names))?))
}

/// Put the partitions of `tables` one after another under `divisions`
pub fn stack_partitions(tables: &[Table], divisions: Divisions) -> FrameResult<Table> {
    let first = tables
        .first()
        .ok_or_else(|| FrameError::new(Code::Invalid, "no tables to concatenate"))?;
    let meta = concat_meta(tables)?;
    let name = concat_token("concat", tables)?;
    let mut builder = GraphBuilder::new(first.graph());
    let mut i = 0;
    for t in tables {
        builder.merge(t.graph());
        for key in t.keys() {
            builder.insert(TaskKey::new(name.clone(), i), Task::Alias(key));
            i += 1;
        }
    }
    Table::new(first.ctx().clone(), builder.build(), name, meta, divisions)?.with_kind(first.kind())
}

/// Concatenate tables aligned to common boundaries, bucket by bucket
fn concat_indexed(tables: &[Table]) -> FrameResult<Table> {
    let meta = concat_meta(tables)?;
    let known = tables
        .iter()
        .map(|t| if t.known_divisions() { Ok(t.clone()) } else { t.compute_divisions() })
        .collect::<FrameResult<Vec<_>>>()?;
    let aligned = align_many(&known)?;
    let first = aligned
        .first()
        .ok_or_else(|| FrameError::new(Code::Invalid, "no tables to concatenate"))?;
    let npartitions = first.table.npartitions();
    if aligned.iter().any(|a| a.table.npartitions() != npartitions) {
        return Err(FrameError::new(
            Code::Invalid,
            "aligned tables disagree on the number of partitions",
        ));
    }

    let aligned_tables: Vec<Table> = aligned.iter().map(|a| a.table.clone()).collect();
    let name = concat_token("concat-indexed", &aligned_tables)?;
    let mut builder = GraphBuilder::new(first.table.graph());
    for t in &aligned_tables[1..] {
        builder.merge(t.graph());
    }
    for i in 0..npartitions {
        let deps = aligned_tables.iter().map(|t| t.key(i)).collect();
        builder.insert(
            TaskKey::new(name.clone(), i),
            Task::apply("concat", deps, |inputs| {
                let frames = inputs
                    .iter()
                    .map(|d| d.as_frame().cloned())
                    .collect::<FrameResult<Vec<_>>>()?;
                Ok(Datum::Frame(Frame::concat(&frames)?))
            }),
        );
    }
    log::debug!("interleaved {} tables into {} partitions", tables.len(), npartitions);
    Table::new(
        first.table.ctx().clone(),
        builder.build(),
        name,
        meta,
        first.table.divisions().clone(),
    )?
    .with_kind(first.table.kind())
}

/// Concatenate tables along the index
///
/// A single input is returned unchanged. When every input has known
/// divisions and each ends strictly before the next begins, partitions are
/// stacked and the divisions chained. Otherwise, with
/// `interleave_partitions`, all inputs are aligned to common boundaries and
/// concatenated bucket by bucket; without it they are stacked with unknown
/// divisions. In-memory sources become single-partition tables.
pub fn concat(ctx: &Arc<FrameContext>, objs: Vec<TableSource>, interleave_partitions: bool) -> FrameResult<Table> {
    let tables = objs
        .into_iter()
        .map(|o| o.into_table(ctx, 1))
        .collect::<FrameResult<Vec<Table>>>()?;
    match tables.len() {
        0 => return Err(FrameError::new(Code::Invalid, "no tables to concatenate")),
        1 => return Ok(tables[0].clone()),
        _ => {}
    }

    if tables.iter().all(Table::known_divisions) {
        let ordered = tables.windows(2).all(|w| {
            match (w[0].divisions().values().last(), w[1].divisions().values().first()) {
                (Some(Some(end)), Some(Some(start))) => end < start,
                _ => false,
            }
        });
        if ordered {
            let mut values = Vec::new();
            for t in &tables[..tables.len() - 1] {
                let known = t.divisions().known_values().unwrap_or_default();
                values.extend(known[..known.len().saturating_sub(1)].iter().cloned());
            }
            values.extend(tables[tables.len() - 1].divisions().known_values().unwrap_or_default());
            return stack_partitions(&tables, Divisions::known(values)?);
        }
    }
    if interleave_partitions {
        return concat_indexed(&tables);
    }
    let total = tables.iter().map(Table::npartitions).sum();
    stack_partitions(&tables, Divisions::unknown(total))
}

impl Table {
    /// Add the rows of `other` after this table's
    pub fn append(&self, other: &Table) -> FrameResult<Table> {
        concat(
            self.ctx(),
            vec![TableSource::Partitioned(self.clone()), TableSource::Partitioned(other.clone())],
            false,
        )
    }
}
