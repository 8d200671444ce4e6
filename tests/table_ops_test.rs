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

//! Table construction and per-partition operations

use std::sync::Arc;

use arrow::array::{Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use partframe::graph::{Datum, Graph, GraphBuilder, Task, TaskKey};
use partframe::{
    from_frame, Code, Divisions, Frame, FrameContext, FromFrameOptions, IndexSource, ScalarValue, Table, TableKind,
};

fn create_frame(index: Vec<i64>, values: Vec<i64>) -> Frame {
    let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap();
    Frame::new(Arc::new(Int64Array::from(index)), batch).unwrap()
}

/// A table whose partitions are exactly `parts`
fn create_table(ctx: &Arc<FrameContext>, name: &str, parts: Vec<Frame>, divisions: Divisions) -> Table {
    let mut builder = GraphBuilder::new(&Graph::new());
    for (i, part) in parts.iter().enumerate() {
        builder.insert(TaskKey::new(name, i), Task::Const(Datum::Frame(part.clone())));
    }
    Table::new(ctx.clone(), builder.build(), name, parts[0].clone(), divisions).unwrap()
}

fn ints(array: &dyn Array) -> Vec<i64> {
    array.as_any().downcast_ref::<Int64Array>().unwrap().values().to_vec()
}

fn int_divisions(values: &[i64]) -> Divisions {
    Divisions::known(values.iter().map(|&v| ScalarValue::Int64(v)).collect()).unwrap()
}

fn assert_division_invariant(table: &Table) {
    let parts = table.compute_partitions().unwrap();
    for (i, part) in parts.iter().enumerate() {
        let (lo, hi) = table.divisions().bounds(i).unwrap();
        for v in part.index_values().unwrap() {
            assert!(&v >= lo && &v <= hi, "{} outside partition {} bounds [{}, {}]", v, i, lo, hi);
        }
    }
}

#[test]
fn test_table_requires_partition_tasks() {
    let ctx = FrameContext::init();
    let result = Table::new(
        ctx,
        Graph::new(),
        "empty",
        create_frame(vec![], vec![]),
        Divisions::unknown(2),
    );
    assert_eq!(result.unwrap_err().code(), Code::Invalid);
}

#[test]
fn test_divisions_must_be_non_decreasing() {
    let err = Divisions::known(vec![ScalarValue::Int64(3), ScalarValue::Int64(1)]).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
    assert!(!Divisions::unknown(3).is_known());
    assert_eq!(Divisions::unknown(3).npartitions(), 3);
    assert_eq!(int_divisions(&[0, 5, 9]).npartitions(), 2);
}

#[test]
fn test_from_frame_sorted_divisions() {
    let ctx = FrameContext::init();
    let frame = create_frame(vec![5, 0, 3, 1, 4, 2], vec![50, 0, 30, 10, 40, 20]);
    let table = from_frame(&ctx, frame, FromFrameOptions::with_npartitions(2)).unwrap();

    assert_eq!(table.npartitions(), 2);
    assert_eq!(table.divisions(), &int_divisions(&[0, 3, 5]));
    assert!(table.name().starts_with("from_frame-"));
    assert_division_invariant(&table);

    let all = table.compute().unwrap();
    assert_eq!(ints(all.index().as_ref()), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_from_frame_never_splits_equal_index_values() {
    let ctx = FrameContext::init();
    let frame = create_frame(vec![1, 1, 1, 2, 2, 3], vec![0, 1, 2, 3, 4, 5]);
    let table = from_frame(&ctx, frame, FromFrameOptions::with_npartitions(3)).unwrap();

    assert!(table.known_divisions());
    assert_division_invariant(&table);
    let key_sets = table.key_sets().unwrap();
    for i in 0..key_sets.len() {
        for j in i + 1..key_sets.len() {
            assert!(key_sets[i].is_disjoint(&key_sets[j]));
        }
    }
}

#[test]
fn test_from_frame_unsorted_chunks() {
    let ctx = FrameContext::init();
    let frame = create_frame(vec![5, 0, 3, 1, 4], vec![0; 5]);
    let table = from_frame(&ctx, frame, FromFrameOptions::with_chunksize(2).sort(false).name("raw")).unwrap();

    assert_eq!(table.name(), "raw");
    assert_eq!(table.npartitions(), 3);
    assert!(!table.known_divisions());
    assert_eq!(table.partition_sizes().unwrap(), vec![2, 2, 1]);
}

#[test]
fn test_from_frame_options_are_exclusive() {
    let ctx = FrameContext::init();
    let frame = create_frame(vec![0, 1], vec![0, 1]);
    let options = FromFrameOptions {
        npartitions: Some(1),
        chunksize: Some(1),
        ..FromFrameOptions::default()
    };
    let err = from_frame(&ctx, frame.clone(), options).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);

    let err = from_frame(&ctx, frame.clone(), FromFrameOptions::default()).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);

    let err = from_frame(&ctx, frame, FromFrameOptions::with_npartitions(0)).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
}

#[test]
fn test_from_empty_frame() {
    let ctx = FrameContext::init();
    let table = from_frame(&ctx, create_frame(vec![], vec![]), FromFrameOptions::with_npartitions(4)).unwrap();
    assert_eq!(table.npartitions(), 1);
    assert_eq!(table.compute().unwrap().num_rows(), 0);
}

#[test]
fn test_compute_divisions_drops_empty_partitions() {
    let ctx = FrameContext::init();
    let table = create_table(
        &ctx,
        "gappy",
        vec![
            create_frame(vec![1, 2], vec![1, 2]),
            create_frame(vec![], vec![]),
            create_frame(vec![3, 3], vec![3, 3]),
        ],
        Divisions::unknown(3),
    );

    let computed = table.compute_divisions().unwrap();
    assert_eq!(computed.npartitions(), 2);
    assert_eq!(computed.divisions(), &int_divisions(&[1, 3, 3]));
    assert_division_invariant(&computed);
}

#[test]
fn test_compute_divisions_rejects_unsorted_partitions() {
    let ctx = FrameContext::init();
    let table = create_table(
        &ctx,
        "unsorted",
        vec![create_frame(vec![5, 6], vec![0, 0]), create_frame(vec![1, 2], vec![0, 0])],
        Divisions::unknown(2),
    );
    assert_eq!(table.compute_divisions().unwrap_err().code(), Code::Invalid);
}

#[test]
fn test_reset_index_forced() {
    let ctx = FrameContext::init();
    let table = create_table(
        &ctx,
        "sizes",
        vec![
            create_frame(vec![7, 8], vec![1, 2]),
            create_frame(vec![], vec![]),
            create_frame(vec![9, 10, 11], vec![3, 4, 5]),
        ],
        Divisions::unknown(3),
    );

    let reset = table.reset_index(true).unwrap();
    assert_eq!(reset.divisions(), &int_divisions(&[0, 2, 2, 4]));
    let all = reset.compute().unwrap();
    assert_eq!(ints(all.index().as_ref()), vec![0, 1, 2, 3, 4]);
    assert_eq!(ints(all.column("a").unwrap().as_ref()), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_reset_index_per_partition() {
    let ctx = FrameContext::init();
    let table = create_table(
        &ctx,
        "local",
        vec![create_frame(vec![7, 8], vec![1, 2]), create_frame(vec![9], vec![3])],
        int_divisions(&[7, 9, 9]),
    );

    let reset = table.reset_index(false).unwrap();
    assert!(!reset.known_divisions());
    let all = reset.compute().unwrap();
    assert_eq!(ints(all.index().as_ref()), vec![0, 1, 0]);
}

#[test]
fn test_set_index_from_column() {
    let ctx = FrameContext::init();
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int64, false),
        Field::new("v", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![5, 3, 9, 1, 7, 2])),
            Arc::new(Int64Array::from(vec![50, 30, 90, 10, 70, 20])),
        ],
    )
    .unwrap();
    let table = from_frame(
        &ctx,
        Frame::from_batch(batch),
        FromFrameOptions::with_npartitions(3).sort(false),
    )
    .unwrap();

    let indexed = table.set_index(IndexSource::Column("k".to_string()), true, false).unwrap();
    assert!(indexed.known_divisions());
    assert_eq!(indexed.columns(), vec!["v".to_string()]);
    assert_division_invariant(&indexed);

    let all = indexed.compute().unwrap();
    assert_eq!(all.index_name(), Some("k"));
    assert_eq!(ints(all.index().as_ref()), vec![1, 2, 3, 5, 7, 9]);
    assert_eq!(ints(all.column("v").unwrap().as_ref()), vec![10, 20, 30, 50, 70, 90]);
}

#[test]
fn test_set_index_from_series() {
    let ctx = FrameContext::init();
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int64, false),
        Field::new("v", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![4, 8, 6, 2])),
            Arc::new(Int64Array::from(vec![40, 80, 60, 20])),
        ],
    )
    .unwrap();
    let table = from_frame(
        &ctx,
        Frame::from_batch(batch),
        FromFrameOptions::with_npartitions(2).sort(false),
    )
    .unwrap();
    let keys = table.column("k").unwrap();

    let indexed = table.set_index(IndexSource::Series(keys), true, false).unwrap();
    assert!(indexed.known_divisions());
    assert_eq!(indexed.columns(), vec!["k".to_string(), "v".to_string()]);
    assert_division_invariant(&indexed);

    let all = indexed.compute().unwrap();
    assert_eq!(all.index_name(), Some("k"));
    assert_eq!(ints(all.index().as_ref()), vec![2, 4, 6, 8]);
    assert_eq!(ints(all.column("v").unwrap().as_ref()), vec![20, 40, 60, 80]);
}

#[test]
fn test_set_index_errors() {
    let ctx = FrameContext::init();
    let table = from_frame(
        &ctx,
        create_frame(vec![0, 1, 2], vec![3, 2, 1]),
        FromFrameOptions::with_npartitions(1),
    )
    .unwrap();

    let err = table.set_index(IndexSource::Column("a".to_string()), false, false).unwrap_err();
    assert_eq!(err.code(), Code::NotImplemented);

    let err = table.set_index(IndexSource::Column("missing".to_string()), true, false).unwrap_err();
    assert_eq!(err.code(), Code::KeyError);

    let err = table.set_index(IndexSource::Table(table.clone()), true, false).unwrap_err();
    assert_eq!(err.code(), Code::TypeError);

    let err = table.set_index(IndexSource::Series(table.clone()), true, false).unwrap_err();
    assert_eq!(err.code(), Code::TypeError);
}

#[test]
fn test_column_and_assign() {
    let ctx = FrameContext::init();
    let table = from_frame(
        &ctx,
        create_frame(vec![0, 1, 2, 3], vec![1, 2, 3, 4]),
        FromFrameOptions::with_npartitions(2),
    )
    .unwrap();

    let series = table.column("a").unwrap();
    assert_eq!(series.kind(), TableKind::Series);
    let doubled = series
        .map_partitions("double", |f| {
            let values = f.data().column(0);
            let doubled = arrow::compute::kernels::numeric::add(values, values)?;
            f.assign("a", doubled)
        })
        .unwrap();
    assert_eq!(doubled.kind(), TableKind::Series);

    let assigned = table.assign("b", &doubled).unwrap();
    assert_eq!(assigned.columns(), vec!["a".to_string(), "b".to_string()]);
    let all = assigned.compute().unwrap();
    assert_eq!(ints(all.column("b").unwrap().as_ref()), vec![2, 4, 6, 8]);
}

#[test]
fn test_assign_requires_matching_partitions() {
    let ctx = FrameContext::init();
    let frame = create_frame(vec![0, 1, 2, 3], vec![1, 2, 3, 4]);
    let table = from_frame(&ctx, frame.clone(), FromFrameOptions::with_npartitions(2)).unwrap();
    let other = from_frame(&ctx, frame, FromFrameOptions::with_npartitions(4)).unwrap();

    let err = table.assign("b", &other.column("a").unwrap()).unwrap_err();
    assert_eq!(err.code(), Code::NotImplemented);
    let err = table.assign("b", &other).unwrap_err();
    assert_eq!(err.code(), Code::TypeError);
}

#[test]
fn test_map_partitions_schema_inference_error() {
    let ctx = FrameContext::init();
    let table = from_frame(&ctx, create_frame(vec![0], vec![1]), FromFrameOptions::with_npartitions(1)).unwrap();
    let err = table.map_partitions("pick-missing", |f| f.select(&["missing"])).unwrap_err();
    assert_eq!(err.code(), Code::SchemaInference);
    assert!(err.to_string().contains("pick-missing"));
}

#[test]
fn test_query_filters_rows() {
    let ctx = FrameContext::init();
    let table = from_frame(
        &ctx,
        create_frame(vec![0, 1, 2, 3, 4, 5], vec![5, 1, 4, 2, 3, 0]),
        FromFrameOptions::with_npartitions(2),
    )
    .unwrap();

    let filtered = table.query("a >= 3").unwrap();
    assert_eq!(filtered.divisions(), table.divisions());
    let all = filtered.compute().unwrap();
    assert_eq!(ints(all.index().as_ref()), vec![0, 2, 4]);

    assert_eq!(table.query("b > 1").unwrap_err().code(), Code::KeyError);
    assert_eq!(table.query("a > @x").unwrap_err().code(), Code::NotImplemented);
}

#[test]
fn test_get_partition_out_of_range() {
    let ctx = FrameContext::init();
    let table = from_frame(&ctx, create_frame(vec![0], vec![1]), FromFrameOptions::with_npartitions(1)).unwrap();
    assert_eq!(table.get_partition(0).unwrap().num_rows(), 1);
    assert_eq!(table.get_partition(3).unwrap_err().code(), Code::IndexError);
}
