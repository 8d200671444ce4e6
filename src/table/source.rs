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

//! Building tables from in-memory data

use std::sync::Arc;

use arrow::record_batch::RecordBatch;

use crate::ctx::FrameContext;
use crate::error::{Code, FrameError, FrameResult};
use crate::frame::Frame;
use crate::graph::{Datum, Graph, Task};
use crate::partition::Divisions;
use crate::scalar::ScalarValue;
use crate::table::Table;
use crate::util::generate_name;

/// Anything that can become a partitioned table
pub enum TableSource {
    /// Already partitioned; passed through unchanged
    Partitioned(Table),
    /// A single in-memory frame with its own index
    Frame(Frame),
    /// A bare Arrow batch, given a range index
    Arrow(RecordBatch),
}

impl From<Table> for TableSource {
    fn from(table: Table) -> Self {
        TableSource::Partitioned(table)
    }
}

impl From<Frame> for TableSource {
    fn from(frame: Frame) -> Self {
        TableSource::Frame(frame)
    }
}

impl From<RecordBatch> for TableSource {
    fn from(batch: RecordBatch) -> Self {
        TableSource::Arrow(batch)
    }
}

impl TableSource {
    /// Convert to a table, splitting in-memory data into `npartitions`
    pub fn into_table(self, ctx: &Arc<FrameContext>, npartitions: usize) -> FrameResult<Table> {
        match self {
            TableSource::Partitioned(table) => Ok(table),
            TableSource::Frame(frame) => from_frame(ctx, frame, FromFrameOptions::with_npartitions(npartitions)),
            TableSource::Arrow(batch) => from_frame(
                ctx,
                Frame::from_batch(batch),
                FromFrameOptions::with_npartitions(npartitions),
            ),
        }
    }
}

/// Options for [`from_frame`]; exactly one of `npartitions` and `chunksize`
#[derive(Debug, Clone)]
pub struct FromFrameOptions {
    pub npartitions: Option<usize>,
    pub chunksize: Option<usize>,
    /// Sort by index first and split only between distinct index values
    pub sort: bool,
    pub name: Option<String>,
}

impl Default for FromFrameOptions {
    fn default() -> Self {
        Self {
            npartitions: None,
            chunksize: None,
            sort: true,
            name: None,
        }
    }
}

impl FromFrameOptions {
    pub fn with_npartitions(npartitions: usize) -> Self {
        Self {
            npartitions: Some(npartitions),
            ..Self::default()
        }
    }

    pub fn with_chunksize(chunksize: usize) -> Self {
        Self {
            chunksize: Some(chunksize),
            ..Self::default()
        }
    }

    pub fn sort(mut self, sort: bool) -> Self {
        self.sort = sort;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Split an in-memory frame into a table
///
/// With `sort` the frame is sorted by index and split positions are moved to
/// the start of a run of equal index values, so the result has known
/// divisions and may have fewer partitions than requested. Without `sort` the
/// frame is cut every `chunksize` rows and divisions are unknown.
pub fn from_frame(ctx: &Arc<FrameContext>, frame: Frame, options: FromFrameOptions) -> FrameResult<Table> {
    let nrows = frame.num_rows();
    let chunksize = match (options.npartitions, options.chunksize) {
        (Some(0), None) => return Err(FrameError::new(Code::Invalid, "npartitions must be positive")),
        (Some(n), None) => nrows.div_ceil(n).max(1),
        (None, Some(0)) => return Err(FrameError::new(Code::Invalid, "chunksize must be positive")),
        (None, Some(c)) => c,
        _ => {
            return Err(FrameError::new(
                Code::Invalid,
                "exactly one of npartitions and chunksize must be specified",
            ))
        }
    };
    let name = options
        .name
        .clone()
        .unwrap_or_else(|| format!("from_frame-{}", generate_name()));

    let (frame, splits, divisions) = if nrows == 0 {
        (frame, vec![0, 0], Divisions::unknown(1))
    } else if options.sort {
        let sorted = frame.sort_index()?;
        let (splits, values) = sorted_splits(&sorted, chunksize)?;
        (sorted, splits, Divisions::known(values)?)
    } else {
        let mut splits: Vec<usize> = (0..nrows).step_by(chunksize).collect();
        splits.push(nrows);
        let n = splits.len() - 1;
        (frame, splits, Divisions::unknown(n))
    };

    let meta = frame.empty_like();
    let tasks: Vec<Task> = splits
        .windows(2)
        .map(|w| Task::Const(Datum::Frame(frame.slice(w[0], w[1] - w[0]))))
        .collect();
    log::debug!("from_frame {} split {} rows into {} partitions", name, nrows, tasks.len());
    Table::from_tasks(ctx.clone(), &Graph::new(), name, tasks, meta, divisions)
}

/// Split positions (with the end offset) and division values of a frame
/// sorted by index
fn sorted_splits(frame: &Frame, chunksize: usize) -> FrameResult<(Vec<usize>, Vec<ScalarValue>)> {
    let index = frame.index_values()?;
    let nrows = index.len();

    // starts of runs of equal index values, then the last row
    let mut segments: Vec<usize> = (0..nrows).filter(|&i| i == 0 || index[i] != index[i - 1]).collect();
    segments.push(nrows - 1);

    let mut splits = vec![0];
    let mut last = 0;
    let mut current = 0;
    for &s in &segments {
        current += s - last;
        last = s;
        if current >= chunksize {
            splits.push(s);
            current = 0;
        }
    }
    if splits.len() == 1 || splits[splits.len() - 1] != nrows - 1 {
        splits.push(nrows - 1);
    }

    let divisions = splits.iter().map(|&s| index[s].clone()).collect();
    if let Some(end) = splits.last_mut() {
        *end += 1;
    }
    Ok((splits, divisions))
}
