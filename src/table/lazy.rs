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

//! Single lazy results such as reductions

use std::sync::Arc;

use crate::ctx::FrameContext;
use crate::error::{Code, FrameError, FrameResult};
use crate::graph::{tokenize, Datum, Graph, GraphBuilder, Task, TaskKey};
use crate::partition::Divisions;
use crate::scalar::ScalarValue;
use crate::table::Table;

/// A single deferred value: one key of a task graph plus its inferred meta
#[derive(Clone)]
pub struct LazyScalar {
    ctx: Arc<FrameContext>,
    graph: Graph,
    key: TaskKey,
    meta: Datum,
}

impl LazyScalar {
    pub fn new(ctx: Arc<FrameContext>, graph: Graph, key: TaskKey, meta: Datum) -> FrameResult<Self> {
        if !graph.contains(&key) {
            return Err(FrameError::new(Code::Invalid, format!("graph has no task {}", key)));
        }
        Ok(Self { ctx, graph, key, meta })
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Result of evaluating the functions on empty partitions
    pub fn meta(&self) -> &Datum {
        &self.meta
    }

    pub fn compute(&self) -> FrameResult<Datum> {
        let mut results = self.ctx.get(&self.graph, std::slice::from_ref(&self.key))?;
        results
            .pop()
            .ok_or_else(|| FrameError::new(Code::ExecutionError, "executor returned no result"))
    }

    /// Evaluate and expect a scalar result
    pub fn compute_scalar(&self) -> FrameResult<ScalarValue> {
        self.compute()?.as_scalar().cloned()
    }

    /// Combine two lazy values with `func`, e.g. a sum and a count into a mean
    pub fn zip_with<F>(&self, other: &LazyScalar, label: &str, func: F) -> FrameResult<LazyScalar>
    where
        F: Fn(&Datum, &Datum) -> FrameResult<Datum> + Send + Sync + 'static,
    {
        let meta = func(&self.meta, &other.meta).map_err(|e| FrameError::schema_inference(label, e))?;
        let name = format!("{}-{}", label, tokenize(&(label, &self.key, &other.key))?);
        let key = TaskKey::with_path(name, vec![0]);
        let mut builder = GraphBuilder::new(&self.graph);
        builder.merge(&other.graph);
        builder.insert(
            key.clone(),
            Task::apply(label, vec![self.key.clone(), other.key.clone()], move |inputs| {
                func(&inputs[0], &inputs[1])
            }),
        );
        LazyScalar::new(self.ctx.clone(), builder.build(), key, meta)
    }

    /// A frame-valued result as a one-partition table with unknown divisions
    pub fn into_table(self) -> FrameResult<Table> {
        let meta = match &self.meta {
            Datum::Frame(f) => f.clone(),
            _ => {
                return Err(FrameError::new(
                    Code::TypeError,
                    format!("{} does not produce a frame", self.key),
                ))
            }
        };
        let name = format!("{}-table", self.key.name);
        Table::from_tasks(
            self.ctx,
            &self.graph,
            name,
            vec![Task::Alias(self.key)],
            meta,
            Divisions::unknown(1),
        )
    }
}

impl std::fmt::Debug for LazyScalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<partframe.Scalar | {} | {} tasks>", self.key, self.graph.len())
    }
}
