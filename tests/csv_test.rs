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

//! Chunked CSV reading tests

use std::fs;
use std::path::{Path, PathBuf};

use arrow::array::{Array, Int64Array};
use partframe::ctx::CHUNK_SIZE_KEY;
use partframe::io::{parse_bytes, plan_chunks};
use partframe::{read_csv, Code, CsvReadOptions, Frame, FrameContext};
use tempfile::TempDir;

/// A file with header `a,b` and rows `i,2*i` for `i` in `range`
fn create_csv(dir: &Path, name: &str, range: std::ops::Range<i64>) -> PathBuf {
    let mut contents = String::from("a,b\n");
    for i in range {
        contents.push_str(&format!("{},{}\n", i, i * 2));
    }
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn pattern(dir: &TempDir, glob: &str) -> String {
    dir.path().join(glob).to_str().unwrap().to_string()
}

fn int_column(frame: &Frame, name: &str) -> Vec<i64> {
    frame
        .column(name)
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap()
        .iter()
        .flatten()
        .collect()
}

#[test]
fn test_parse_bytes() {
    assert_eq!(parse_bytes("128 MiB").unwrap(), 134_217_728);
    assert_eq!(parse_bytes("5kB").unwrap(), 5_000);
    assert_eq!(parse_bytes("2G").unwrap(), 2_000_000_000);
    assert_eq!(parse_bytes("1024").unwrap(), 1024);
    assert_eq!(parse_bytes("Ki").unwrap(), 1024);
    assert_eq!(parse_bytes("1.5 KiB").unwrap(), 1536);
    assert_eq!(parse_bytes("10 b").unwrap(), 10);
}

#[test]
fn test_parse_bytes_rejects_bad_input() {
    assert_eq!(parse_bytes("5 parsecs").unwrap_err().code(), Code::Invalid);
    assert_eq!(parse_bytes("").unwrap_err().code(), Code::Invalid);
    assert_eq!(parse_bytes("-3 MB").unwrap_err().code(), Code::Invalid);
    assert_eq!(parse_bytes("x.y MB").unwrap_err().code(), Code::Invalid);
}

#[test]
fn test_plan_chunks() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hundred.csv");
    fs::write(&path, vec![b'x'; 100]).unwrap();
    let empty = dir.path().join("empty.csv");
    fs::write(&empty, b"").unwrap();

    let plan = plan_chunks(&[path.clone(), empty], 30).unwrap();
    let offsets: Vec<u64> = plan.iter().map(|c| c.offset).collect();
    assert_eq!(offsets, vec![0, 30, 60, 90]);
    assert!(plan[0].header);
    assert!(plan[1..].iter().all(|c| !c.header));
    assert!(plan.iter().all(|c| c.path == path && c.length == 30));

    assert_eq!(plan_chunks(&[path], 0).unwrap_err().code(), Code::Invalid);
}

#[test]
fn test_small_chunks_read_every_row_once() {
    let dir = TempDir::new().unwrap();
    create_csv(dir.path(), "data.csv", 0..50);
    let ctx = FrameContext::init();

    let options = CsvReadOptions::default().with_chunk_size(16);
    let table = read_csv(&ctx, &pattern(&dir, "data.csv"), &options).unwrap();
    assert!(table.npartitions() > 10);
    assert!(!table.known_divisions());
    assert!(table.name().starts_with("read-csv-"));
    assert_eq!(table.columns(), vec!["a".to_string(), "b".to_string()]);

    let sizes = table.partition_sizes().unwrap();
    assert_eq!(sizes.iter().sum::<usize>(), 50);

    let result = table.compute().unwrap();
    assert_eq!(int_column(&result, "a"), (0..50).collect::<Vec<_>>());
    assert_eq!(int_column(&result, "b"), (0..50).map(|i| i * 2).collect::<Vec<_>>());
}

#[test]
fn test_chunk_size_independent_result() {
    let dir = TempDir::new().unwrap();
    create_csv(dir.path(), "data.csv", 0..200);
    let ctx = FrameContext::init();

    for size in ["7", "64", "1 KiB", "1 MiB"] {
        let options = CsvReadOptions::default().with_chunk_size_str(size);
        let result = read_csv(&ctx, &pattern(&dir, "data.csv"), &options)
            .unwrap()
            .compute()
            .unwrap();
        assert_eq!(int_column(&result, "a"), (0..200).collect::<Vec<_>>(), "chunk size {}", size);
    }
}

#[test]
fn test_glob_reads_files_in_order() {
    let dir = TempDir::new().unwrap();
    create_csv(dir.path(), "part-1.csv", 10..20);
    create_csv(dir.path(), "part-0.csv", 0..10);
    fs::write(dir.path().join("part-2.csv"), b"").unwrap();
    let ctx = FrameContext::init();

    let options = CsvReadOptions::default().with_chunk_size(32);
    let result = read_csv(&ctx, &pattern(&dir, "part-*.csv"), &options)
        .unwrap()
        .compute()
        .unwrap();
    assert_eq!(int_column(&result, "a"), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_context_chunk_size_is_default() {
    let dir = TempDir::new().unwrap();
    let path = create_csv(dir.path(), "data.csv", 0..20);
    let size = fs::metadata(&path).unwrap().len();
    let ctx = FrameContext::init();
    ctx.add_config(CHUNK_SIZE_KEY, "25");

    let table = read_csv(&ctx, &pattern(&dir, "data.csv"), &CsvReadOptions::default()).unwrap();
    assert_eq!(table.npartitions() as u64, size.div_ceil(25));
}

#[test]
fn test_no_match_is_io_error() {
    let dir = TempDir::new().unwrap();
    let ctx = FrameContext::init();
    let err = read_csv(&ctx, &pattern(&dir, "*.csv"), &CsvReadOptions::default()).unwrap_err();
    assert_eq!(err.code(), Code::IoError);
}

#[test]
fn test_all_empty_files_are_invalid() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.csv"), b"").unwrap();
    let ctx = FrameContext::init();
    let err = read_csv(&ctx, &pattern(&dir, "*.csv"), &CsvReadOptions::default()).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
}

#[test]
fn test_include_columns() {
    let dir = TempDir::new().unwrap();
    create_csv(dir.path(), "data.csv", 0..5);
    let ctx = FrameContext::init();

    let options = CsvReadOptions::default().with_include_columns(vec!["b".to_string()]);
    let table = read_csv(&ctx, &pattern(&dir, "data.csv"), &options).unwrap();
    assert_eq!(table.columns(), vec!["b".to_string()]);
    assert_eq!(int_column(&table.compute().unwrap(), "b"), vec![0, 2, 4, 6, 8]);

    let options = CsvReadOptions::default().with_include_columns(vec!["c".to_string()]);
    assert_eq!(
        read_csv(&ctx, &pattern(&dir, "data.csv"), &options).unwrap_err().code(),
        Code::Invalid
    );
}

#[test]
fn test_explicit_column_names() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("raw.csv"), "1,10\n2,20\n3,30\n").unwrap();
    let ctx = FrameContext::init();

    let options = CsvReadOptions::default()
        .with_column_names(vec!["id".to_string(), "value".to_string()])
        .with_chunk_size(6);
    let result = read_csv(&ctx, &pattern(&dir, "raw.csv"), &options)
        .unwrap()
        .compute()
        .unwrap();
    assert_eq!(int_column(&result, "id"), vec![1, 2, 3]);
    assert_eq!(int_column(&result, "value"), vec![10, 20, 30]);

    let options = CsvReadOptions::default().with_column_names(vec!["only".to_string()]);
    assert_eq!(
        read_csv(&ctx, &pattern(&dir, "raw.csv"), &options).unwrap_err().code(),
        Code::Invalid
    );
}
