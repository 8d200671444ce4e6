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

//! Dependency graphs of partition tasks
//!
//! Every table operation adds one or more named layers of tasks to a
//! [`Graph`]. A task is keyed by `(name, index...)`; all tasks sharing a name
//! live in the same layer. Layers are immutable and shared by `Arc`, so
//! deriving a new table from an old one never copies the old table's tasks.
//!
//! Names come from [`tokenize`], which hashes the inputs of a construction
//! call into a deterministic token. Building the same operation twice over
//! the same inputs yields identical keys.

pub mod executor;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Code, FrameError, FrameResult};
use crate::frame::Frame;
use crate::scalar::ScalarValue;

pub use executor::{Executor, LocalExecutor, ThreadedExecutor};

/// Key of one task in the graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskKey {
    pub name: String,
    pub index: Vec<usize>,
}

impl TaskKey {
    /// Key of partition `i` of `name`
    pub fn new(name: impl Into<String>, i: usize) -> Self {
        Self {
            name: name.into(),
            index: vec![i],
        }
    }

    /// Key with a multi-part index such as `(depth, i)`
    pub fn with_path(name: impl Into<String>, index: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "('{}'", self.name)?;
        for i in &self.index {
            write!(f, ", {}", i)?;
        }
        write!(f, ")")
    }
}

/// Values passed between tasks
#[derive(Debug, Clone)]
pub enum Datum {
    Frame(Frame),
    Scalar(ScalarValue),
    KeySet(BTreeSet<ScalarValue>),
    Count(usize),
    List(Vec<Datum>),
}

impl Datum {
    fn kind(&self) -> &'static str {
        match self {
            Datum::Frame(_) => "frame",
            Datum::Scalar(_) => "scalar",
            Datum::KeySet(_) => "key set",
            Datum::Count(_) => "count",
            Datum::List(_) => "list",
        }
    }

    fn mismatch(&self, expected: &str) -> FrameError {
        FrameError::new(
            Code::TypeError,
            format!("expected a {} but task produced a {}", expected, self.kind()),
        )
    }

    pub fn as_frame(&self) -> FrameResult<&Frame> {
        match self {
            Datum::Frame(f) => Ok(f),
            other => Err(other.mismatch("frame")),
        }
    }

    pub fn into_frame(self) -> FrameResult<Frame> {
        match self {
            Datum::Frame(f) => Ok(f),
            other => Err(other.mismatch("frame")),
        }
    }

    pub fn as_scalar(&self) -> FrameResult<&ScalarValue> {
        match self {
            Datum::Scalar(s) => Ok(s),
            other => Err(other.mismatch("scalar")),
        }
    }

    pub fn as_key_set(&self) -> FrameResult<&BTreeSet<ScalarValue>> {
        match self {
            Datum::KeySet(k) => Ok(k),
            other => Err(other.mismatch("key set")),
        }
    }

    pub fn as_count(&self) -> FrameResult<usize> {
        match self {
            Datum::Count(n) => Ok(*n),
            other => Err(other.mismatch("count")),
        }
    }

    pub fn as_list(&self) -> FrameResult<&[Datum]> {
        match self {
            Datum::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }
}

impl From<Frame> for Datum {
    fn from(frame: Frame) -> Self {
        Datum::Frame(frame)
    }
}

impl From<ScalarValue> for Datum {
    fn from(value: ScalarValue) -> Self {
        Datum::Scalar(value)
    }
}

/// Function applied by a task to the results of its dependencies
pub type TaskFn = Arc<dyn Fn(&[Datum]) -> FrameResult<Datum> + Send + Sync>;

/// One node of the graph
#[derive(Clone)]
pub enum Task {
    /// A literal value
    Const(Datum),
    /// The result of another task
    Alias(TaskKey),
    /// `func` applied to the results of `deps`, in order
    Apply {
        label: String,
        func: TaskFn,
        deps: Vec<TaskKey>,
    },
}

impl Task {
    /// Build an `Apply` task
    pub fn apply<F>(label: impl Into<String>, deps: Vec<TaskKey>, func: F) -> Self
    where
        F: Fn(&[Datum]) -> FrameResult<Datum> + Send + Sync + 'static,
    {
        Task::Apply {
            label: label.into(),
            func: Arc::new(func),
            deps,
        }
    }

    pub fn dependencies(&self) -> &[TaskKey] {
        match self {
            Task::Const(_) => &[],
            Task::Alias(key) => std::slice::from_ref(key),
            Task::Apply { deps, .. } => deps,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Const(d) => write!(f, "Const({})", d.kind()),
            Task::Alias(k) => write!(f, "Alias({})", k),
            Task::Apply { label, deps, .. } => {
                write!(f, "Apply({}, [", label)?;
                for (i, d) in deps.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", d)?;
                }
                write!(f, "])")
            }
        }
    }
}

type Layer = Arc<HashMap<TaskKey, Task>>;

/// An immutable task graph made of named layers
#[derive(Clone, Default)]
pub struct Graph {
    layers: BTreeMap<String, Layer>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a task
    pub fn get(&self, key: &TaskKey) -> Option<&Task> {
        self.layers.get(&key.name).and_then(|layer| layer.get(key))
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.get(key).is_some()
    }

    /// Total number of tasks
    pub fn len(&self) -> usize {
        self.layers.values().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.keys().map(String::as_str).collect()
    }

    /// Number of tasks in layer `name`, zero if absent
    pub fn layer_len(&self, name: &str) -> usize {
        self.layers.get(name).map(|l| l.len()).unwrap_or(0)
    }

    /// Layers whose name contains `pattern`, with their task counts
    pub fn layers_matching(&self, pattern: &str) -> Vec<(&str, usize)> {
        self.layers
            .iter()
            .filter(|(name, _)| name.contains(pattern))
            .map(|(name, layer)| (name.as_str(), layer.len()))
            .collect()
    }

    /// Union of two graphs, sharing layers
    pub fn merge(&self, other: &Graph) -> Graph {
        let mut layers = self.layers.clone();
        for (name, layer) in &other.layers {
            layers.entry(name.clone()).or_insert_with(|| layer.clone());
        }
        Graph { layers }
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.layers.iter().map(|(name, layer)| (name, layer.len())))
            .finish()
    }
}

/// Accumulates new tasks on top of existing graphs
pub struct GraphBuilder {
    base: Graph,
    pending: BTreeMap<String, HashMap<TaskKey, Task>>,
}

impl GraphBuilder {
    pub fn new(base: &Graph) -> Self {
        Self {
            base: base.clone(),
            pending: BTreeMap::new(),
        }
    }

    /// Include the layers of another graph
    pub fn merge(&mut self, other: &Graph) -> &mut Self {
        self.base = self.base.merge(other);
        self
    }

    pub fn insert(&mut self, key: TaskKey, task: Task) -> &mut Self {
        self.pending.entry(key.name.clone()).or_default().insert(key, task);
        self
    }

    /// Number of tasks added so far
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(|l| l.len()).sum()
    }

    pub fn build(self) -> Graph {
        let mut graph = self.base;
        for (name, tasks) in self.pending {
            graph.layers.insert(name, Arc::new(tasks));
        }
        graph
    }
}

/// Deterministic 32-hex-digit token of serializable inputs
pub fn tokenize<T: Serialize + ?Sized>(parts: &T) -> FrameResult<String> {
    let bytes = serde_json::to_vec(parts)?;
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes).simple().to_string())
}
