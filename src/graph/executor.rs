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

//! Graph executors
//!
//! An [`Executor`] evaluates the part of a graph reachable from a set of
//! requested keys. Both executors here first cull the graph and arrange the
//! reachable tasks into topological levels; every task of a level depends
//! only on tasks of earlier levels.

use std::collections::HashMap;

use tokio::runtime::Runtime;
use tokio::task::JoinSet;

use crate::error::{Code, FrameError, FrameResult};
use crate::graph::{Datum, Graph, Task, TaskKey};

/// Evaluates graphs
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluate `keys`, returning their results in the same order
    fn get(&self, graph: &Graph, keys: &[TaskKey]) -> FrameResult<Vec<Datum>>;
}

/// Topological levels of the tasks reachable from `keys`
///
/// Missing keys and cycles are `Invalid` errors.
pub fn plan(graph: &Graph, keys: &[TaskKey]) -> FrameResult<Vec<Vec<TaskKey>>> {
    enum Mark {
        Visiting,
        Done(usize),
    }

    let mut marks: HashMap<TaskKey, Mark> = HashMap::new();
    // (key, next dependency to visit)
    let mut stack: Vec<(TaskKey, usize)> = Vec::new();

    for root in keys {
        if marks.contains_key(root) {
            continue;
        }
        stack.push((root.clone(), 0));
        marks.insert(root.clone(), Mark::Visiting);

        while let Some((key, next)) = stack.pop() {
            let task = graph.get(&key).ok_or_else(|| {
                FrameError::new(Code::Invalid, format!("task {} is not in the graph", key))
            })?;
            let deps = task.dependencies();
            if next < deps.len() {
                let dep = deps[next].clone();
                stack.push((key, next + 1));
                match marks.get(&dep) {
                    Some(Mark::Visiting) => {
                        return Err(FrameError::new(
                            Code::Invalid,
                            format!("cycle detected through task {}", dep),
                        ))
                    }
                    Some(Mark::Done(_)) => {}
                    None => {
                        if !graph.contains(&dep) {
                            return Err(FrameError::new(
                                Code::Invalid,
                                format!("task {} depends on missing task {}", stack[stack.len() - 1].0, dep),
                            ));
                        }
                        marks.insert(dep.clone(), Mark::Visiting);
                        stack.push((dep, 0));
                    }
                }
            } else {
                let level = deps
                    .iter()
                    .map(|d| match marks.get(d) {
                        Some(Mark::Done(l)) => l + 1,
                        _ => 0,
                    })
                    .max()
                    .unwrap_or(0);
                marks.insert(key, Mark::Done(level));
            }
        }
    }

    let mut levels: Vec<Vec<TaskKey>> = Vec::new();
    for (key, mark) in marks {
        if let Mark::Done(level) = mark {
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(key);
        }
    }
    for level in levels.iter_mut() {
        level.sort();
    }
    Ok(levels)
}

fn gather(task: &Task, results: &HashMap<TaskKey, Datum>) -> FrameResult<Vec<Datum>> {
    task.dependencies()
        .iter()
        .map(|d| {
            results
                .get(d)
                .cloned()
                .ok_or_else(|| FrameError::new(Code::Invalid, format!("result of task {} is not available", d)))
        })
        .collect()
}

fn wrap(key: &TaskKey, err: FrameError) -> FrameError {
    match err {
        FrameError::Execution { .. } => err,
        other => FrameError::Execution {
            key: key.to_string(),
            message: other.to_string(),
        },
    }
}

/// Run one task on already gathered inputs
fn run(key: &TaskKey, task: &Task, inputs: Vec<Datum>) -> FrameResult<Datum> {
    log::trace!("evaluating task {}", key);
    match task {
        Task::Const(datum) => Ok(datum.clone()),
        Task::Alias(_) => inputs
            .into_iter()
            .next()
            .ok_or_else(|| FrameError::new(Code::Invalid, format!("alias {} has no target", key))),
        Task::Apply { func, .. } => func(&inputs).map_err(|e| wrap(key, e)),
    }
}

fn collect_results(keys: &[TaskKey], results: &HashMap<TaskKey, Datum>) -> FrameResult<Vec<Datum>> {
    keys.iter()
        .map(|k| {
            results
                .get(k)
                .cloned()
                .ok_or_else(|| FrameError::new(Code::Invalid, format!("task {} was not evaluated", k)))
        })
        .collect()
}

/// Evaluates tasks one at a time on the calling thread
#[derive(Debug, Default, Clone)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for LocalExecutor {
    fn name(&self) -> &str {
        "local"
    }

    fn get(&self, graph: &Graph, keys: &[TaskKey]) -> FrameResult<Vec<Datum>> {
        let levels = plan(graph, keys)?;
        let mut results: HashMap<TaskKey, Datum> = HashMap::new();
        for level in levels {
            for key in level {
                let task = graph
                    .get(&key)
                    .ok_or_else(|| FrameError::new(Code::Invalid, format!("task {} is not in the graph", key)))?;
                let inputs = gather(task, &results)?;
                let datum = run(&key, task, inputs)?;
                results.insert(key, datum);
            }
        }
        collect_results(keys, &results)
    }
}

/// Evaluates the independent tasks of each level concurrently
///
/// Tasks run on the blocking pool of an owned tokio runtime. `get` must not
/// be called from inside another tokio runtime.
pub struct ThreadedExecutor {
    runtime: Runtime,
    threads: usize,
}

impl ThreadedExecutor {
    /// Create an executor with `threads` workers
    pub fn new(threads: usize) -> FrameResult<Self> {
        let threads = threads.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .max_blocking_threads(threads)
            .thread_name("partframe-worker")
            .build()?;
        Ok(Self { runtime, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl Executor for ThreadedExecutor {
    fn name(&self) -> &str {
        "threaded"
    }

    fn get(&self, graph: &Graph, keys: &[TaskKey]) -> FrameResult<Vec<Datum>> {
        let levels = plan(graph, keys)?;
        log::debug!(
            "threaded executor running {} levels on {} threads",
            levels.len(),
            self.threads
        );
        let results = self.runtime.block_on(async {
            let mut results: HashMap<TaskKey, Datum> = HashMap::new();
            for level in levels {
                let mut set = JoinSet::new();
                for key in level {
                    let task = graph
                        .get(&key)
                        .ok_or_else(|| FrameError::new(Code::Invalid, format!("task {} is not in the graph", key)))?
                        .clone();
                    let inputs = gather(&task, &results)?;
                    set.spawn_blocking(move || {
                        let datum = run(&key, &task, inputs);
                        (key, datum)
                    });
                }
                while let Some(joined) = set.join_next().await {
                    let (key, datum) = joined.map_err(|e| {
                        FrameError::new(Code::ExecutionError, format!("worker task failed: {}", e))
                    })?;
                    results.insert(key, datum?);
                }
            }
            Ok::<_, FrameError>(results)
        })?;
        collect_results(keys, &results)
    }
}
