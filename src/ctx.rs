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

//! Context and configuration
//!
//! A [`FrameContext`] is shared by every table built from it. It carries the
//! executor used both for metadata queries during graph construction and for
//! `compute`, plus a string-keyed configuration map.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Code, FrameError, FrameResult};
use crate::graph::{Datum, Executor, Graph, LocalExecutor, TaskKey, ThreadedExecutor};
use crate::io::csv::parse_bytes;

/// Config key of the default tree-reduction fan-in
pub const SPLIT_EVERY_KEY: &str = "partframe.split_every";
/// Config key of the ingestion chunk size, a byte count or a string such as `"64 MiB"`
pub const CHUNK_SIZE_KEY: &str = "partframe.csv.chunk_size";
/// Config key recording the threaded executor's worker count
pub const THREADS_KEY: &str = "partframe.executor.threads";

pub const DEFAULT_SPLIT_EVERY: usize = 8;
pub const DEFAULT_CHUNK_SIZE: &str = "128 MiB";

const ENV_SPLIT_EVERY: &str = "PARTFRAME_SPLIT_EVERY";
const ENV_CHUNK_SIZE: &str = "PARTFRAME_CHUNK_SIZE";
const ENV_THREADS: &str = "PARTFRAME_THREADS";

/// The entry point to partframe operations
pub struct FrameContext {
    config: RwLock<HashMap<String, String>>,
    executor: Arc<dyn Executor>,
    sequence_no: Mutex<u64>,
}

impl FrameContext {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            config: RwLock::new(HashMap::new()),
            executor,
            sequence_no: Mutex::new(0),
        }
    }

    /// Context evaluating on the calling thread
    pub fn init() -> Arc<Self> {
        Arc::new(Self::new(Arc::new(LocalExecutor::new())))
    }

    /// Context using the given executor
    pub fn with_executor(executor: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new(Self::new(executor))
    }

    /// Context configured from `PARTFRAME_*` environment variables
    ///
    /// `PARTFRAME_THREADS` selects the threaded executor.
    pub fn from_env() -> FrameResult<Arc<Self>> {
        let threads = match std::env::var(ENV_THREADS) {
            Ok(value) => Some(parse_threads(&value)?),
            Err(_) => None,
        };
        let executor: Arc<dyn Executor> = match threads {
            Some(n) => Arc::new(ThreadedExecutor::new(n)?),
            None => Arc::new(LocalExecutor::new()),
        };
        let ctx = Self::new(executor);
        if let Some(n) = threads {
            ctx.add_config(THREADS_KEY, n.to_string());
        }
        if let Ok(value) = std::env::var(ENV_SPLIT_EVERY) {
            ctx.add_config(SPLIT_EVERY_KEY, value);
            ctx.split_every()?;
        }
        if let Ok(value) = std::env::var(ENV_CHUNK_SIZE) {
            ctx.add_config(CHUNK_SIZE_KEY, value);
            ctx.chunk_size()?;
        }
        log::debug!("context from environment using {} executor", ctx.executor.name());
        Ok(Arc::new(ctx))
    }

    /// Adds a configuration
    pub fn add_config(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        config.insert(key.into(), value.into());
    }

    /// Returns a configuration
    pub fn get_config(&self, key: &str, default: &str) -> String {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        config.get(key).cloned().unwrap_or_else(|| default.to_string())
    }

    /// Configured default fan-in of tree reductions
    pub fn split_every(&self) -> FrameResult<usize> {
        let value = self.get_config(SPLIT_EVERY_KEY, &DEFAULT_SPLIT_EVERY.to_string());
        let n = value.trim().parse::<usize>().map_err(|_| {
            FrameError::new(Code::Invalid, format!("{} must be an integer, got '{}'", SPLIT_EVERY_KEY, value))
        })?;
        if n < 2 {
            return Err(FrameError::new(
                Code::Invalid,
                format!("{} must be at least 2, got {}", SPLIT_EVERY_KEY, n),
            ));
        }
        Ok(n)
    }

    /// Configured default ingestion chunk size in bytes
    pub fn chunk_size(&self) -> FrameResult<u64> {
        parse_bytes(&self.get_config(CHUNK_SIZE_KEY, DEFAULT_CHUNK_SIZE))
    }

    pub fn threads(&self) -> Option<usize> {
        self.get_config(THREADS_KEY, "").parse().ok()
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Evaluate `keys` of `graph` now
    pub fn get(&self, graph: &Graph, keys: &[TaskKey]) -> FrameResult<Vec<Datum>> {
        self.executor.get(graph, keys)
    }

    /// Returns the next sequence number
    pub fn next_sequence(&self) -> u64 {
        let mut seq = self.sequence_no.lock().unwrap_or_else(|e| e.into_inner());
        *seq += 1;
        *seq
    }
}

impl fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("FrameContext")
            .field("executor", &self.executor.name())
            .field("config", &*config)
            .finish()
    }
}

fn parse_threads(value: &str) -> FrameResult<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(FrameError::new(
            Code::Invalid,
            format!("{} must be a positive integer, got '{}'", ENV_THREADS, value),
        )),
    }
}
