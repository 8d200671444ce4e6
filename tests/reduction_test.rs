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

//! Tree reduction tests

use std::sync::Arc;

use arrow::array::{Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use partframe::graph::{Datum, Graph, GraphBuilder, Task, TaskKey};
use partframe::reduction::{reduction, Arg, Kwargs, Reducer, ReductionOptions};
use partframe::{Code, Divisions, Frame, FrameContext, FrameResult, ScalarValue, SplitEvery, Table};

fn create_frame(start: i64, len: usize) -> Frame {
    let index: Vec<i64> = (start..start + len as i64).collect();
    let values: Vec<i64> = index.iter().map(|v| v * 2).collect();
    let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap();
    Frame::new(Arc::new(Int64Array::from(index)), batch).unwrap()
}

/// `npartitions` partitions of three rows each with `x = 2 * index`
fn create_table(ctx: &Arc<FrameContext>, name: &str, npartitions: usize) -> Table {
    let mut builder = GraphBuilder::new(&Graph::new());
    let mut bounds = Vec::new();
    for i in 0..npartitions {
        let start = (i * 3) as i64;
        builder.insert(TaskKey::new(name, i), Task::Const(Datum::Frame(create_frame(start, 3))));
        bounds.push(ScalarValue::Int64(start));
    }
    bounds.push(ScalarValue::Int64((npartitions * 3) as i64 - 1));
    Table::new(
        ctx.clone(),
        builder.build(),
        name,
        create_frame(0, 0),
        Divisions::known(bounds).unwrap(),
    )
    .unwrap()
}

fn sum_column(frame: &Frame) -> FrameResult<i64> {
    let column = frame.column("x")?;
    let column = column.as_any().downcast_ref::<Int64Array>().unwrap();
    Ok(column.iter().flatten().sum())
}

fn sum_chunk() -> Reducer {
    Reducer::new("sum-x", |inputs: &[Datum], _: &Kwargs| {
        Ok(Datum::Scalar(ScalarValue::Int64(sum_column(inputs[0].as_frame()?)?)))
    })
}

fn sum_aggregate() -> Reducer {
    Reducer::new("add", |inputs: &[Datum], _: &Kwargs| {
        let mut total = 0;
        for d in inputs {
            total += d.as_scalar()?.to_i64().unwrap_or(0);
        }
        Ok(Datum::Scalar(ScalarValue::Int64(total)))
    })
}

fn layer_tasks(graph: &Graph, pattern: &str) -> usize {
    graph.layers_matching(pattern).iter().map(|(_, n)| n).sum()
}

#[test]
fn test_tree_shape() {
    let ctx = FrameContext::init();
    let table = create_table(&ctx, "parts", 20);
    let options = ReductionOptions::default().split_every(SplitEvery::Width(8));
    let result = reduction(&[Arg::Table(table)], &sum_chunk(), &sum_aggregate(), None, &options).unwrap();

    let graph = result.graph();
    assert_eq!(layer_tasks(graph, "-chunk-"), 20);
    assert_eq!(layer_tasks(graph, "-combine-"), 3);
    assert_eq!(layer_tasks(graph, "-agg-"), 1);
    assert_eq!(result.key().index, vec![0]);
    assert!(result.key().name.starts_with("add-agg-"));
}

#[test]
fn test_result_independent_of_split_every() {
    let ctx = FrameContext::init();
    let table = create_table(&ctx, "parts", 20);
    let expected: i64 = (0..60).map(|v| v * 2).sum();

    for split_every in [
        SplitEvery::Width(2),
        SplitEvery::Width(3),
        SplitEvery::Width(8),
        SplitEvery::Flat,
        SplitEvery::Default,
    ] {
        let options = ReductionOptions::default().split_every(split_every);
        let result = reduction(&[Arg::Table(table.clone())], &sum_chunk(), &sum_aggregate(), None, &options)
            .unwrap()
            .compute_scalar()
            .unwrap();
        assert_eq!(result, ScalarValue::Int64(expected), "split_every {:?}", split_every);
    }
}

#[test]
fn test_flat_reduction_has_no_combine_layer() {
    let ctx = FrameContext::init();
    let table = create_table(&ctx, "parts", 20);
    let options = ReductionOptions::default().split_every(SplitEvery::Flat);
    let result = reduction(&[Arg::Table(table)], &sum_chunk(), &sum_aggregate(), None, &options).unwrap();
    assert_eq!(layer_tasks(result.graph(), "-combine-"), 0);
}

#[test]
fn test_split_every_below_two_is_invalid() {
    let ctx = FrameContext::init();
    let table = create_table(&ctx, "parts", 4);
    let options = ReductionOptions::default().split_every(SplitEvery::Width(1));
    let err = reduction(&[Arg::Table(table)], &sum_chunk(), &sum_aggregate(), None, &options).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
}

#[test]
fn test_mismatched_partition_counts_are_invalid() {
    let ctx = FrameContext::init();
    let a = create_table(&ctx, "a", 3);
    let b = create_table(&ctx, "b", 4);
    let err = reduction(
        &[Arg::Table(a), Arg::Table(b)],
        &sum_chunk(),
        &sum_aggregate(),
        None,
        &ReductionOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
}

#[test]
fn test_schema_inference_failure_names_function() {
    let ctx = FrameContext::init();
    let table = create_table(&ctx, "parts", 2);
    let chunk = Reducer::new("bad-chunk", |_: &[Datum], _: &Kwargs| {
        Err(partframe::FrameError::new(Code::ValueError, "cannot handle this"))
    });
    let err = reduction(&[Arg::Table(table)], &chunk, &sum_aggregate(), None, &ReductionOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), Code::SchemaInference);
    assert!(err.to_string().contains("bad-chunk"), "{}", err);
}

#[test]
fn test_explicit_meta_skips_inference() {
    let ctx = FrameContext::init();
    let table = create_table(&ctx, "parts", 2);
    let chunk = Reducer::new("needs-rows", |inputs: &[Datum], _: &Kwargs| {
        let frame = inputs[0].as_frame()?;
        if frame.is_empty() {
            return Err(partframe::FrameError::new(Code::ValueError, "empty partition"));
        }
        Ok(Datum::Scalar(ScalarValue::Int64(frame.num_rows() as i64)))
    });
    let options = ReductionOptions::default().meta(Datum::Scalar(ScalarValue::Int64(0)));
    let result = reduction(&[Arg::Table(table)], &chunk, &sum_aggregate(), None, &options)
        .unwrap()
        .compute_scalar()
        .unwrap();
    assert_eq!(result, ScalarValue::Int64(6));
}

#[test]
fn test_combine_kwargs_require_combine() {
    let ctx = FrameContext::init();
    let table = create_table(&ctx, "parts", 2);
    let mut options = ReductionOptions::default();
    options.combine_kwargs.insert("scale".to_string(), ScalarValue::Int64(2));
    let err = reduction(&[Arg::Table(table)], &sum_chunk(), &sum_aggregate(), None, &options).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
}

#[test]
fn test_values_and_kwargs_reach_chunks() {
    let ctx = FrameContext::init();
    let table = create_table(&ctx, "parts", 5);

    // chunk(partition, factor, offset=..) = factor * sum(x) + offset
    let chunk = Reducer::new("scaled", |inputs: &[Datum], kwargs: &Kwargs| {
        let factor = inputs[1].as_scalar()?.to_i64().unwrap_or(0);
        let offset = kwargs.get("offset").and_then(ScalarValue::to_i64).unwrap_or(0);
        let total = sum_column(inputs[0].as_frame()?)?;
        Ok(Datum::Scalar(ScalarValue::Int64(factor * total + offset)))
    });
    let mut options = ReductionOptions::default().split_every(SplitEvery::Width(2));
    options.chunk_kwargs.insert("offset".to_string(), ScalarValue::Int64(1));

    let result = reduction(
        &[Arg::Table(table), Arg::Value(ScalarValue::Int64(10))],
        &chunk,
        &sum_aggregate(),
        None,
        &options,
    )
    .unwrap()
    .compute_scalar()
    .unwrap();
    let base: i64 = (0..15).map(|v| v * 2).sum();
    assert_eq!(result, ScalarValue::Int64(10 * base + 5));
}

#[test]
fn test_combine_differs_from_aggregate() {
    let ctx = FrameContext::init();
    let table = create_table(&ctx, "parts", 9);

    // combine keeps partial sums, aggregate reports the number of combined groups
    let combine = Reducer::new("partial", |inputs: &[Datum], _: &Kwargs| {
        let mut total = 0;
        for d in inputs {
            total += d.as_scalar()?.to_i64().unwrap_or(0);
        }
        Ok(Datum::Scalar(ScalarValue::Int64(total)))
    });
    let aggregate = Reducer::new("groups", |inputs: &[Datum], _: &Kwargs| {
        Ok(Datum::Scalar(ScalarValue::Int64(inputs.len() as i64)))
    });
    let options = ReductionOptions::default().split_every(SplitEvery::Width(3));
    let result = reduction(&[Arg::Table(table)], &sum_chunk(), &aggregate, Some(&combine), &options)
        .unwrap()
        .compute_scalar()
        .unwrap();
    assert_eq!(result, ScalarValue::Int64(3));
}

#[test]
fn test_token_prefixes_keys() {
    let ctx = FrameContext::init();
    let table = create_table(&ctx, "parts", 3);
    let options = ReductionOptions::default().token("total");
    let result = reduction(&[Arg::Table(table)], &sum_chunk(), &sum_aggregate(), None, &options).unwrap();
    assert!(result.key().name.starts_with("total-agg-"));
    assert_eq!(layer_tasks(result.graph(), "total-chunk-"), 3);
}
