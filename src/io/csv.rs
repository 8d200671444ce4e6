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

//! Chunked CSV ingestion
//!
//! Every file matched by a path pattern is cut into byte ranges of a fixed
//! size and each range becomes one partition. Ranges rarely fall on record
//! boundaries, so a record belongs to the range holding its first byte: a
//! reader skips the partial record at the start of its range and reads past
//! the end of its range to finish the last record it started. Records must
//! not contain embedded newlines.
//!
//! Only the first range of a file sees the header line. Later ranges are
//! read without header handling, using the schema inferred from the first
//! non-empty file.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::ctx::FrameContext;
use crate::error::{Code, FrameError, FrameResult};
use crate::frame::Frame;
use crate::graph::{tokenize, Datum, Graph, Task};
use crate::partition::Divisions;
use crate::table::Table;

/// Rows used for schema inference
const INFER_ROWS: usize = 100;

/// Parse a byte count such as `"128 MiB"`, `"5kB"`, `"2G"` or `"1024"`
///
/// Decimal units (`kB`, `MB`, ...) and their single letters are powers of
/// 1000, binary units (`KiB`, `MiB`, ...) and their `Ki`, `Mi` forms are
/// powers of 1024. Units are case-insensitive and a missing number means 1.
pub fn parse_bytes(s: &str) -> FrameResult<u64> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase();
    if cleaned.is_empty() {
        return Err(FrameError::new(Code::Invalid, "empty byte size"));
    }
    let split = cleaned
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(cleaned.len());
    let (number, unit) = cleaned.split_at(split);
    let number: f64 = if number.is_empty() {
        1.0
    } else {
        number
            .parse()
            .map_err(|_| FrameError::new(Code::Invalid, format!("could not parse a number from byte size '{}'", s)))?
    };
    if !number.is_finite() || number < 0.0 {
        return Err(FrameError::new(Code::Invalid, format!("byte size '{}' is not a non-negative number", s)));
    }

    let multiplier: u64 = match unit {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "m" | "mb" => 1_000_000,
        "g" | "gb" => 1_000_000_000,
        "t" | "tb" => 1_000_000_000_000,
        "p" | "pb" => 1_000_000_000_000_000,
        "ki" | "kib" => 1 << 10,
        "mi" | "mib" => 1 << 20,
        "gi" | "gib" => 1 << 30,
        "ti" | "tib" => 1 << 40,
        "pi" | "pib" => 1 << 50,
        _ => {
            return Err(FrameError::new(
                Code::Invalid,
                format!("unsupported unit '{}' in byte size '{}'", unit, s),
            ))
        }
    };
    Ok((number * multiplier as f64) as u64)
}

/// CSV read options
#[derive(Debug, Clone)]
pub struct CsvReadOptions {
    /// Byte size of each range, a count or a string such as `"64 MiB"`;
    /// `None` uses the context's configured chunk size
    pub chunk_size: Option<String>,
    /// CSV delimiter (default: ',')
    pub delimiter: u8,
    /// Whether the first line of each file is a header (default: true)
    pub has_header: bool,
    /// Column names (if not using header row)
    pub column_names: Option<Vec<String>>,
    /// Batch size of the arrow reader (default: 8192)
    pub batch_size: usize,
    /// Columns to include (None = all columns)
    pub include_columns: Option<Vec<String>>,
}

impl Default for CsvReadOptions {
    fn default() -> Self {
        Self {
            chunk_size: None,
            delimiter: b',',
            has_header: true,
            column_names: None,
            batch_size: 8192,
            include_columns: None,
        }
    }
}

impl CsvReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the range size in bytes
    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = Some(bytes.to_string());
        self
    }

    /// Set the range size from a string such as `"64 MiB"`
    pub fn with_chunk_size_str(mut self, size: impl Into<String>) -> Self {
        self.chunk_size = Some(size.into());
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    /// Set column names explicitly; files are then read without a header
    pub fn with_column_names(mut self, names: Vec<String>) -> Self {
        self.column_names = Some(names);
        self.has_header = false;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set columns to include (None = all columns)
    pub fn with_include_columns(mut self, columns: Vec<String>) -> Self {
        self.include_columns = Some(columns);
        self
    }
}

/// One byte range of one file, read as one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
    /// Whether this is the first range of its file, the only one that may
    /// hold a header line
    pub header: bool,
}

/// Cut each file into ranges of `chunk_size` bytes, in file order
///
/// An empty file contributes no ranges.
pub fn plan_chunks(paths: &[PathBuf], chunk_size: u64) -> FrameResult<Vec<ChunkPlan>> {
    if chunk_size == 0 {
        return Err(FrameError::new(Code::Invalid, "chunk size must be positive"));
    }
    let mut plan = Vec::new();
    for path in paths {
        let size = std::fs::metadata(path)
            .map_err(|e| FrameError::new(Code::IoError, format!("failed to stat '{}': {}", path.display(), e)))?
            .len();
        if size == 0 {
            log::warn!("skipping empty file '{}'", path.display());
        }
        let mut offset = 0;
        while offset < size {
            plan.push(ChunkPlan {
                path: path.clone(),
                offset,
                length: chunk_size,
                header: offset == 0,
            });
            offset += chunk_size;
        }
    }
    Ok(plan)
}

/// Files matching `pattern`, sorted
fn expand_pattern(pattern: &str) -> FrameResult<Vec<PathBuf>> {
    let entries = glob::glob(pattern)
        .map_err(|e| FrameError::new(Code::Invalid, format!("invalid path pattern '{}': {}", pattern, e)))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| FrameError::new(Code::IoError, e.to_string()))?;
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    if paths.is_empty() {
        log::warn!("no files match '{}'", pattern);
        return Err(FrameError::new(Code::IoError, format!("no files match '{}'", pattern)));
    }
    Ok(paths)
}

fn open(path: &Path) -> FrameResult<File> {
    File::open(path).map_err(|e| FrameError::new(Code::IoError, format!("failed to open CSV file '{}': {}", path.display(), e)))
}

/// Position of the first newline at or after `pos`
fn next_newline(reader: &mut BufReader<File>, pos: u64) -> FrameResult<Option<u64>> {
    reader.seek(SeekFrom::Start(pos))?;
    let mut line = Vec::new();
    let read = reader.read_until(b'\n', &mut line)?;
    if read > 0 && line.last() == Some(&b'\n') {
        Ok(Some(pos + read as u64 - 1))
    } else {
        Ok(None)
    }
}

/// Bytes of the records starting inside `chunk`
fn read_range(chunk: &ChunkPlan) -> FrameResult<Vec<u8>> {
    let file = open(&chunk.path)?;
    let size = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let start = if chunk.offset == 0 {
        0
    } else {
        match next_newline(&mut reader, chunk.offset - 1)? {
            Some(nl) => nl + 1,
            None => size,
        }
    };
    let last = chunk.offset.saturating_add(chunk.length);
    let end = if last >= size {
        size
    } else {
        match next_newline(&mut reader, last - 1)? {
            Some(nl) => nl + 1,
            None => size,
        }
    };
    if start >= end {
        return Ok(Vec::new());
    }

    reader.seek(SeekFrom::Start(start))?;
    let mut bytes = Vec::with_capacity((end - start) as usize);
    reader.take(end - start).read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Infer the schema from the first rows of `path`
fn infer_schema(path: &Path, options: &CsvReadOptions) -> FrameResult<SchemaRef> {
    let format = Format::default()
        .with_delimiter(options.delimiter)
        .with_header(options.has_header);
    let (schema, _) = format
        .infer_schema(&mut BufReader::new(open(path)?), Some(INFER_ROWS))
        .map_err(|e| FrameError::new(Code::IoError, format!("failed to infer CSV schema of '{}': {}", path.display(), e)))?;

    let schema = match &options.column_names {
        Some(names) => {
            if names.len() != schema.fields().len() {
                return Err(FrameError::new(
                    Code::Invalid,
                    format!("{} column names given for {} columns", names.len(), schema.fields().len()),
                ));
            }
            let fields: Vec<Field> = schema
                .fields()
                .iter()
                .zip(names)
                .map(|(f, name)| Field::new(name, f.data_type().clone(), true))
                .collect();
            Schema::new(fields)
        }
        None => schema,
    };
    Ok(Arc::new(schema))
}

/// Indices of `include` in `schema`
fn projection(schema: &Schema, include: &Option<Vec<String>>) -> FrameResult<Option<Vec<usize>>> {
    match include {
        None => Ok(None),
        Some(columns) => columns
            .iter()
            .map(|c| {
                schema
                    .index_of(c)
                    .map_err(|_| FrameError::new(Code::Invalid, format!("Column '{}' not found in CSV", c)))
            })
            .collect::<FrameResult<Vec<_>>>()
            .map(Some),
    }
}

/// Parse one range into a frame with a range index
fn read_chunk(chunk: &ChunkPlan, schema: &SchemaRef, options: &CsvReadOptions) -> FrameResult<Frame> {
    let bytes = read_range(chunk)?;
    let reader = ReaderBuilder::new(schema.clone())
        .with_delimiter(options.delimiter)
        .with_batch_size(options.batch_size)
        .with_header(options.has_header && chunk.header)
        .build(Cursor::new(bytes))?;
    let batches = reader.collect::<Result<Vec<RecordBatch>, _>>()?;
    let batch = arrow::compute::concat_batches(schema, &batches)?;
    let batch = match projection(schema, &options.include_columns)? {
        Some(indices) => batch.project(&indices)?,
        None => batch,
    };
    log::trace!(
        "read {} rows from '{}' at byte {}",
        batch.num_rows(),
        chunk.path.display(),
        chunk.offset
    );
    Ok(Frame::from_batch(batch))
}

/// Read CSV files matching `pattern` into a table, one partition per range
///
/// # Arguments
/// * `ctx` - The context, which also supplies the default range size
/// * `pattern` - A path or glob pattern; matches are read in sorted order
/// * `options` - Parsing options shared by every range
///
/// # Returns
/// A table named `read-csv-<token>` with unknown divisions
pub fn read_csv(ctx: &Arc<FrameContext>, pattern: &str, options: &CsvReadOptions) -> FrameResult<Table> {
    let chunk_size = match &options.chunk_size {
        Some(size) => parse_bytes(size)?,
        None => ctx.chunk_size()?,
    };
    let paths = expand_pattern(pattern)?;
    let plan = plan_chunks(&paths, chunk_size)?;
    let first = plan
        .first()
        .ok_or_else(|| FrameError::new(Code::Invalid, format!("CSV files matching '{}' are empty", pattern)))?;
    let schema = infer_schema(&first.path, options)?;

    let sizes = paths
        .iter()
        .map(|p| Ok((p.display().to_string(), std::fs::metadata(p)?.len())))
        .collect::<FrameResult<Vec<(String, u64)>>>()?;
    let token = tokenize(&(
        pattern,
        &sizes,
        chunk_size,
        options.delimiter,
        options.has_header,
        &options.column_names,
        &options.include_columns,
    ))?;
    let name = format!("read-csv-{}", token);

    let meta_batch = RecordBatch::new_empty(schema.clone());
    let meta_batch = match projection(&schema, &options.include_columns)? {
        Some(indices) => meta_batch.project(&indices)?,
        None => meta_batch,
    };
    let meta = Frame::from_batch(meta_batch);

    let tasks = plan
        .iter()
        .map(|chunk| {
            let chunk = chunk.clone();
            let schema = schema.clone();
            let options = options.clone();
            Task::apply("read-csv", vec![], move |_| {
                Ok(Datum::Frame(read_chunk(&chunk, &schema, &options)?))
            })
        })
        .collect::<Vec<_>>();
    log::info!(
        "reading {} files matching '{}' as {} partitions of {} bytes",
        paths.len(),
        pattern,
        tasks.len(),
        chunk_size
    );
    let npartitions = tasks.len();
    Table::from_tasks(
        ctx.clone(),
        &Graph::new(),
        name,
        tasks,
        meta,
        Divisions::unknown(npartitions),
    )
}
