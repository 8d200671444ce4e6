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

//! partframe: lazy partitioned tables over a task graph
//!
//! A [`Table`] is a sequence of in-memory Arrow partitions described by a
//! dependency graph rather than held in memory. Partitions may carry
//! [`Divisions`], the index boundaries that let joins, alignment and sorts
//! decide which partitions meet without scanning rows. Operations build new
//! graph layers; an [`graph::Executor`] evaluates them on demand.

pub mod ctx;
pub mod error;
pub mod frame;
pub mod graph;
pub mod io;
pub mod ops;
pub mod partition;
pub mod reduction;
pub mod scalar;
pub mod table;
pub mod util;

// Re-export commonly used types
pub use crate::ctx::FrameContext;
pub use crate::error::{Code, FrameError, FrameResult};
pub use crate::frame::{Frame, JoinHow, JoinSuffixes};
pub use crate::io::{read_csv, CsvReadOptions};
pub use crate::ops::concat;
pub use crate::partition::Divisions;
pub use crate::reduction::SplitEvery;
pub use crate::scalar::ScalarValue;
pub use crate::table::{from_frame, FromFrameOptions, IndexSource, LazyScalar, Table, TableKind, TableSource};

/// The main entry point and version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
