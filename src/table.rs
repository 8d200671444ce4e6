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

//! Table - lazy partitioned frame
//!
//! A [`Table`] is an immutable descriptor: a task graph, the name under which
//! its partitions `(name, 0) .. (name, N - 1)` live in that graph, an empty
//! but typed `meta` frame and the partition divisions. Transformations add
//! layers to a copy of the graph and return a new table.
//!
//! Metadata queries (partition sizes, key sets, index bounds) evaluate small
//! throwaway graphs through the context's executor while an operation is
//! being built. Nothing else runs until [`Table::compute`].

pub mod lazy;
pub mod source;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::ctx::FrameContext;
use crate::error::{Code, FrameError, FrameResult};
use crate::frame::query::Expr;
use crate::frame::Frame;
use crate::graph::{tokenize, Datum, Graph, GraphBuilder, Task, TaskKey};
use crate::partition::Divisions;
use crate::scalar::ScalarValue;

pub use lazy::LazyScalar;
pub use source::{from_frame, FromFrameOptions, TableSource};

/// Temporary column used when a Series becomes the index
const INDEX_COLUMN: &str = "__partframe.index";

/// What a table's partitions represent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TableKind {
    /// Any number of named columns
    DataFrame,
    /// Exactly one column
    Series,
    /// Only an index, no columns
    Index,
}

/// Source of a new index for [`Table::set_index`]
pub enum IndexSource {
    Column(String),
    Series(Table),
    Table(Table),
}

/// Table provides the main API for building partitioned computations
#[derive(Clone)]
pub struct Table {
    ctx: Arc<FrameContext>,
    graph: Graph,
    name: String,
    meta: Frame,
    divisions: Divisions,
    kind: TableKind,
}

impl Table {
    /// Create a table whose partitions are the tasks `(name, i)` of `graph`
    pub fn new(
        ctx: Arc<FrameContext>,
        graph: Graph,
        name: impl Into<String>,
        meta: Frame,
        divisions: Divisions,
    ) -> FrameResult<Self> {
        let name = name.into();
        for i in 0..divisions.npartitions() {
            let key = TaskKey::new(name.clone(), i);
            if !graph.contains(&key) {
                return Err(FrameError::new(
                    Code::Invalid,
                    format!("graph has no task for partition {}", key),
                ));
            }
        }
        Ok(Self {
            ctx,
            graph,
            name,
            meta: meta.empty_like(),
            divisions,
            kind: TableKind::DataFrame,
        })
    }

    /// Build a table from one task per partition, layered over `base`
    pub(crate) fn from_tasks(
        ctx: Arc<FrameContext>,
        base: &Graph,
        name: String,
        tasks: Vec<Task>,
        meta: Frame,
        divisions: Divisions,
    ) -> FrameResult<Self> {
        if tasks.len() != divisions.npartitions() {
            return Err(FrameError::new(
                Code::Invalid,
                format!("{} tasks for {} divisions", tasks.len(), divisions.values().len()),
            ));
        }
        let mut builder = GraphBuilder::new(base);
        for (i, task) in tasks.into_iter().enumerate() {
            builder.insert(TaskKey::new(name.clone(), i), task);
        }
        Table::new(ctx, builder.build(), name, meta, divisions)
    }

    /// Reinterpret as a different kind of table
    pub fn with_kind(mut self, kind: TableKind) -> FrameResult<Self> {
        match kind {
            TableKind::Series if self.meta.num_columns() != 1 => {
                return Err(FrameError::new(
                    Code::TypeError,
                    format!("a Series has exactly one column, got {}", self.meta.num_columns()),
                ))
            }
            TableKind::Index if self.meta.num_columns() != 0 => {
                return Err(FrameError::new(
                    Code::TypeError,
                    format!("an Index has no columns, got {}", self.meta.num_columns()),
                ))
            }
            _ => {}
        }
        self.kind = kind;
        Ok(self)
    }

    pub fn ctx(&self) -> &Arc<FrameContext> {
        &self.ctx
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Empty frame with the schema and index type of every partition
    pub fn meta(&self) -> &Frame {
        &self.meta
    }

    pub fn divisions(&self) -> &Divisions {
        &self.divisions
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn npartitions(&self) -> usize {
        self.divisions.npartitions()
    }

    /// True iff no division is unknown
    pub fn known_divisions(&self) -> bool {
        self.divisions.is_known()
    }

    pub fn columns(&self) -> Vec<String> {
        self.meta.column_names()
    }

    /// Graph key of partition `i`
    pub fn key(&self, i: usize) -> TaskKey {
        TaskKey::new(self.name.clone(), i)
    }

    pub fn keys(&self) -> Vec<TaskKey> {
        (0..self.npartitions()).map(|i| self.key(i)).collect()
    }

    /// Same partitions with unknown divisions
    pub fn clear_divisions(&self) -> Table {
        let mut out = self.clone();
        out.divisions = Divisions::unknown(self.npartitions());
        out
    }

    /// Same partitions with the given divisions
    pub(crate) fn with_divisions(&self, divisions: Divisions) -> FrameResult<Table> {
        if divisions.npartitions() != self.npartitions() {
            return Err(FrameError::new(
                Code::Invalid,
                format!(
                    "{} divisions given for {} partitions",
                    divisions.values().len(),
                    self.npartitions()
                ),
            ));
        }
        let mut out = self.clone();
        out.divisions = divisions;
        Ok(out)
    }

    /// Evaluate every partition and concatenate the results
    pub fn compute(&self) -> FrameResult<Frame> {
        let parts = self.compute_partitions()?;
        if parts.is_empty() {
            return Ok(self.meta.clone());
        }
        Frame::concat(&parts)
    }

    /// Evaluate every partition
    pub fn compute_partitions(&self) -> FrameResult<Vec<Frame>> {
        self.ctx
            .get(&self.graph, &self.keys())?
            .into_iter()
            .map(Datum::into_frame)
            .collect()
    }

    /// Evaluate one partition
    pub fn get_partition(&self, i: usize) -> FrameResult<Frame> {
        if i >= self.npartitions() {
            return Err(FrameError::new(
                Code::IndexError,
                format!("partition {} out of range for {} partitions", i, self.npartitions()),
            ));
        }
        let mut result = self.ctx.get(&self.graph, &[self.key(i)])?;
        result
            .pop()
            .ok_or_else(|| FrameError::new(Code::ExecutionError, "executor returned no result"))?
            .into_frame()
    }

    /// Run `func` on every partition now and return the per-partition results
    ///
    /// The tasks go into a throwaway graph; the table itself is unchanged.
    pub(crate) fn evaluate_partitions<F>(&self, label: &str, func: F) -> FrameResult<Vec<Datum>>
    where
        F: Fn(&Frame) -> FrameResult<Datum> + Send + Sync + 'static,
    {
        let name = format!("{}-{}", label, tokenize(&(label, &self.name))?);
        let func = Arc::new(func);
        let mut builder = GraphBuilder::new(&self.graph);
        let mut keys = Vec::with_capacity(self.npartitions());
        for i in 0..self.npartitions() {
            let f = func.clone();
            let key = TaskKey::new(name.clone(), i);
            builder.insert(
                key.clone(),
                Task::apply(label, vec![self.key(i)], move |inputs| f(inputs[0].as_frame()?)),
            );
            keys.push(key);
        }
        self.ctx.get(&builder.build(), &keys)
    }

    /// Number of rows of every partition
    pub fn partition_sizes(&self) -> FrameResult<Vec<usize>> {
        self.evaluate_partitions("sizes", |f| Ok(Datum::Count(f.num_rows())))?
            .iter()
            .map(Datum::as_count)
            .collect()
    }

    /// Distinct index values of every partition
    pub fn key_sets(&self) -> FrameResult<Vec<BTreeSet<ScalarValue>>> {
        self.evaluate_partitions("unique-index", |f| Ok(Datum::KeySet(f.unique_index()?)))?
            .iter()
            .map(|d| d.as_key_set().cloned())
            .collect()
    }

    /// `(min, max)` index value of every partition, `None` when it is empty
    pub fn index_bounds(&self) -> FrameResult<Vec<Option<(ScalarValue, ScalarValue)>>> {
        let results = self.evaluate_partitions("index-bounds", |f| {
            Ok(match (f.min_index()?, f.max_index()?) {
                (Some(lo), Some(hi)) => Datum::List(vec![Datum::Scalar(lo), Datum::Scalar(hi)]),
                _ => Datum::List(vec![]),
            })
        })?;
        results
            .iter()
            .map(|d| {
                let items = d.as_list()?;
                match items {
                    [lo, hi] => Ok(Some((lo.as_scalar()?.clone(), hi.as_scalar()?.clone()))),
                    _ => Ok(None),
                }
            })
            .collect()
    }

    /// Apply `func` to every partition
    ///
    /// The output schema comes from running `func` on `meta`; a failure there
    /// is reported as a schema-inference error naming `label`. Divisions are
    /// kept, so `func` must not move rows across index boundaries.
    pub fn map_partitions<F>(&self, label: &str, func: F) -> FrameResult<Table>
    where
        F: Fn(&Frame) -> FrameResult<Frame> + Send + Sync + 'static,
    {
        self.map_partitions_with(label, &(), None, self.divisions.clone(), func)
    }

    /// `map_partitions` with extra token inputs, an optional known output
    /// meta and explicit output divisions
    pub(crate) fn map_partitions_with<F, T>(
        &self,
        label: &str,
        token_args: &T,
        meta: Option<Frame>,
        divisions: Divisions,
        func: F,
    ) -> FrameResult<Table>
    where
        F: Fn(&Frame) -> FrameResult<Frame> + Send + Sync + 'static,
        T: Serialize + ?Sized,
    {
        let meta = match meta {
            Some(m) => m,
            None => func(&self.meta).map_err(|e| FrameError::schema_inference(label, e))?,
        };
        let name = format!("{}-{}", label, tokenize(&(label, &self.name, token_args))?);
        let func = Arc::new(func);
        let tasks = (0..self.npartitions())
            .map(|i| {
                let f = func.clone();
                Task::apply(label, vec![self.key(i)], move |inputs| {
                    Ok(Datum::Frame(f(inputs[0].as_frame()?)?))
                })
            })
            .collect();
        let out = Table::from_tasks(self.ctx.clone(), &self.graph, name, tasks, meta, divisions)?;
        let kind = match (self.kind, out.meta.num_columns()) {
            (TableKind::Series, 1) => TableKind::Series,
            (TableKind::Index, 0) => TableKind::Index,
            _ => TableKind::DataFrame,
        };
        out.with_kind(kind)
    }

    /// Keep only the partitions at `indices`, in order, under new divisions
    pub(crate) fn select_partitions(&self, label: &str, indices: &[usize], divisions: Divisions) -> FrameResult<Table> {
        let name = format!("{}-{}", label, tokenize(&(label, &self.name, indices))?);
        let tasks = indices.iter().map(|&i| Task::Alias(self.key(i))).collect();
        Table::from_tasks(self.ctx.clone(), &self.graph, name, tasks, self.meta.clone(), divisions)?.with_kind(self.kind)
    }

    /// Derive divisions from the actual index bounds of each partition
    ///
    /// Empty partitions are dropped from the result. Fails with `Invalid` when
    /// the partitions are not ordered by index.
    pub fn compute_divisions(&self) -> FrameResult<Table> {
        if self.known_divisions() {
            return Ok(self.clone());
        }
        let bounds = self.index_bounds()?;
        let mut keep = Vec::new();
        let mut mins = Vec::new();
        let mut maxes = Vec::new();
        for (i, b) in bounds.into_iter().enumerate() {
            if let Some((lo, hi)) = b {
                keep.push(i);
                mins.push(lo);
                maxes.push(hi);
            }
        }
        if keep.is_empty() {
            log::warn!("all {} partitions of {} are empty, divisions stay unknown", self.npartitions(), self.name);
            return Ok(self.clone());
        }
        if keep.len() < self.npartitions() {
            log::warn!(
                "dropping {} empty partitions of {} while computing divisions",
                self.npartitions() - keep.len(),
                self.name
            );
        }
        let divisions = Divisions::from_bounds(&mins, &maxes)?;
        if keep.len() == self.npartitions() {
            return self.with_divisions(divisions);
        }
        self.select_partitions("compute-divisions", &keep, divisions)
    }

    /// Reset the index to a range
    ///
    /// Without `force` each partition gets `0..len` and divisions become
    /// unknown. With `force` the partitions are numbered consecutively across
    /// the whole table using their sizes, which gives known divisions.
    pub fn reset_index(&self, force: bool) -> FrameResult<Table> {
        let meta = self.meta.reset_index();
        if !force {
            return self.map_partitions_with(
                "reset-index",
                &false,
                Some(meta),
                Divisions::unknown(self.npartitions()),
                |f| Ok(f.reset_index()),
            );
        }

        let sizes = self.partition_sizes()?;
        self.reset_index_with_sizes(&sizes)
    }

    /// Forced index reset when the partition sizes are already known
    pub(crate) fn reset_index_with_sizes(&self, sizes: &[usize]) -> FrameResult<Table> {
        if sizes.len() != self.npartitions() {
            return Err(FrameError::new(
                Code::Invalid,
                format!("{} sizes given for {} partitions", sizes.len(), self.npartitions()),
            ));
        }
        let meta = self.meta.reset_index();
        let mut prefixes = Vec::with_capacity(sizes.len());
        let mut total = 0usize;
        for s in sizes {
            prefixes.push(total);
            total += s;
        }

        let divisions = if total == 0 {
            Divisions::unknown(self.npartitions())
        } else {
            let last = (total - 1) as i64;
            let mut values: Vec<ScalarValue> = prefixes
                .iter()
                .map(|&p| ScalarValue::Int64((p as i64).min(last)))
                .collect();
            values.push(ScalarValue::Int64(last));
            Divisions::known(values)?
        };

        let name = format!("reset-index-{}", tokenize(&("reset-index", &self.name, true, sizes))?);
        let tasks = prefixes
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                Task::apply("reset-index", vec![self.key(i)], move |inputs| {
                    Ok(Datum::Frame(inputs[0].as_frame()?.with_range_index(start as i64)))
                })
            })
            .collect();
        log::debug!("forced index reset of {} over {} rows", self.name, total);
        Table::from_tasks(self.ctx.clone(), &self.graph, name, tasks, meta, divisions)?.with_kind(self.kind)
    }

    /// Project onto one column, giving a Series
    pub fn column(&self, name: &str) -> FrameResult<Table> {
        let meta = self.meta.select(&[name])?;
        let column = name.to_string();
        self.map_partitions_with("getitem", name, Some(meta), self.divisions.clone(), move |f| {
            f.select(&[column.as_str()])
        })?
        .with_kind(TableKind::Series)
    }

    /// The index alone
    pub fn to_index(&self) -> FrameResult<Table> {
        let meta = Frame::from_index(self.meta.index().clone())?;
        self.map_partitions_with("to-index", &(), Some(meta), self.divisions.clone(), |f| {
            Ok(Frame::from_index(f.index().clone())?.with_index_name(f.index_name().map(str::to_string)))
        })?
        .with_kind(TableKind::Index)
    }

    /// Add or replace column `name` with the values of a Series
    ///
    /// Both tables must be partitioned identically.
    pub fn assign(&self, name: &str, series: &Table) -> FrameResult<Table> {
        if series.kind != TableKind::Series {
            return Err(FrameError::new(
                Code::TypeError,
                format!("can only assign a Series, got a {:?}", series.kind),
            ));
        }
        if self.divisions != series.divisions {
            return Err(FrameError::new(Code::NotImplemented, "aligning mismatched partitions"));
        }
        let meta = self.meta.assign(name, series.meta.data().column(0).clone())?;
        let label = "assign";
        let out_name = format!("{}-{}", label, tokenize(&(label, &self.name, name, &series.name))?);
        let tasks = (0..self.npartitions())
            .map(|i| {
                let column = name.to_string();
                Task::apply(label, vec![self.key(i), series.key(i)], move |inputs| {
                    let frame = inputs[0].as_frame()?;
                    let values = inputs[1].as_frame()?.data().column(0).clone();
                    Ok(Datum::Frame(frame.assign(&column, values)?))
                })
            })
            .collect();
        let base = self.graph.merge(&series.graph);
        Table::from_tasks(self.ctx.clone(), &base, out_name, tasks, meta, self.divisions.clone())
    }

    /// Keep rows matching a boolean expression such as `"a > 1 and b == 'x'"`
    pub fn query(&self, expr: &str) -> FrameResult<Table> {
        let parsed = Expr::parse(expr)?;
        parsed.validate(&self.meta)?;
        let meta = self.meta.clone();
        self.map_partitions_with("query", expr, Some(meta), self.divisions.clone(), move |f| f.query(&parsed))
    }

    /// Set a new index from a column or a Series
    ///
    /// The table is sorted by the new index unless `sorted` is set, then
    /// divisions are computed from the partitions. Keeping the old index as a
    /// column (`drop = false`) is not supported.
    pub fn set_index(&self, index: IndexSource, drop: bool, sorted: bool) -> FrameResult<Table> {
        if !drop {
            return Err(FrameError::new(Code::NotImplemented, "set_index with drop=false"));
        }
        match index {
            IndexSource::Column(column) => {
                self.meta.column(&column)?;
                let sorted_table = if sorted {
                    self.clone()
                } else {
                    crate::ops::sort::sort_values(self, &column, false)?
                };
                let meta = sorted_table.meta.set_index(&column)?;
                let token = column.clone();
                let indexed = sorted_table.map_partitions_with(
                    "set-index",
                    token.as_str(),
                    Some(meta),
                    Divisions::unknown(sorted_table.npartitions()),
                    move |f| f.set_index(&column),
                )?;
                indexed.compute_divisions()
            }
            IndexSource::Series(series) => {
                if series.kind != TableKind::Series {
                    return Err(FrameError::new(
                        Code::TypeError,
                        format!("cannot set_index from a {:?}", series.kind),
                    ));
                }
                let index_name = series.columns().into_iter().next();
                let with_column = self.assign(INDEX_COLUMN, &series)?;
                let indexed = with_column.set_index(IndexSource::Column(INDEX_COLUMN.to_string()), drop, sorted)?;
                let meta = indexed.meta.clone().with_index_name(index_name.clone());
                let token = index_name.clone();
                indexed.map_partitions_with(
                    "rename-index",
                    &token,
                    Some(meta),
                    indexed.divisions.clone(),
                    move |f| Ok(f.clone().with_index_name(index_name.clone())),
                )
            }
            IndexSource::Table(table) => Err(FrameError::new(
                Code::TypeError,
                format!("cannot set_index from a {:?}", table.kind),
            )),
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<partframe.{:?} | {} tasks | {} npartitions>",
            self.kind,
            self.graph.len(),
            self.npartitions()
        )
    }
}
