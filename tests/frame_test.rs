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

//! Per-partition frame primitives: local joins, filters and slicing

use std::sync::Arc;

use arrow::array::{Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use partframe::frame::query::{CmpOp, Expr};
use partframe::{Code, Frame, JoinHow, JoinSuffixes, ScalarValue};

fn create_frame(index: Vec<i64>, column: &str, values: Vec<i64>) -> Frame {
    let schema = Arc::new(Schema::new(vec![Field::new(column, DataType::Int64, false)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap();
    Frame::new(Arc::new(Int64Array::from(index)), batch).unwrap()
}

fn index_of(frame: &Frame) -> Vec<i64> {
    frame
        .index()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap()
        .values()
        .to_vec()
}

#[test]
fn test_frame_rejects_mismatched_index_length() {
    let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1, 2, 3]))]).unwrap();
    let result = Frame::new(Arc::new(Int64Array::from(vec![0, 1])), batch);
    assert!(result.is_err());
}

#[test]
fn test_left_join_fills_nulls() {
    let left = create_frame(vec![1, 2, 3], "a", vec![10, 20, 30]);
    let right = create_frame(vec![2, 3, 4], "b", vec![200, 300, 400]);

    let joined = left.join_index(&right, JoinHow::Left, &JoinSuffixes::none()).unwrap();

    // Every left row appears exactly once
    assert_eq!(joined.num_rows(), 3);
    assert_eq!(index_of(&joined), vec![1, 2, 3]);
    let b = joined.column("b").unwrap();
    assert!(b.is_null(0), "index 1 has no right match");
    let b = b.as_any().downcast_ref::<Int64Array>().unwrap();
    assert_eq!(b.value(1), 200);
    assert_eq!(b.value(2), 300);
}

#[test]
fn test_inner_join_keeps_matches_only() {
    let left = create_frame(vec![1, 2, 3], "a", vec![10, 20, 30]);
    let right = create_frame(vec![2, 3, 4], "b", vec![200, 300, 400]);

    let joined = left.join_index(&right, JoinHow::Inner, &JoinSuffixes::none()).unwrap();
    assert_eq!(index_of(&joined), vec![2, 3]);
}

#[test]
fn test_right_join_keeps_right_index() {
    let left = create_frame(vec![1, 2], "a", vec![10, 20]);
    let right = create_frame(vec![2, 5], "b", vec![200, 500]);

    let joined = left.join_index(&right, JoinHow::Right, &JoinSuffixes::none()).unwrap();
    assert_eq!(index_of(&joined), vec![2, 5]);
    let a = joined.column("a").unwrap();
    assert!(!a.is_null(0));
    assert!(a.is_null(1));
}

#[test]
fn test_overlapping_columns_need_suffixes() {
    let left = create_frame(vec![1, 2], "a", vec![10, 20]);
    let right = create_frame(vec![1, 2], "a", vec![100, 200]);

    let err = left.join_index(&right, JoinHow::Inner, &JoinSuffixes::none()).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);

    let joined = left
        .join_index(&right, JoinHow::Inner, &JoinSuffixes::new("_l", "_r"))
        .unwrap();
    assert_eq!(joined.column_names(), vec!["a_l".to_string(), "a_r".to_string()]);
}

#[test]
fn test_outer_join_is_not_implemented() {
    let left = create_frame(vec![1], "a", vec![10]);
    let right = create_frame(vec![1], "b", vec![100]);
    let err = left.join_index(&right, JoinHow::Outer, &JoinSuffixes::none()).unwrap_err();
    assert_eq!(err.code(), Code::NotImplemented);
}

#[test]
fn test_merge_on_column() {
    let schema = Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("x", DataType::Int64, false),
    ]));
    let left = Frame::from_batch(
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
                Arc::new(Int64Array::from(vec![1, 2, 3])),
            ],
        )
        .unwrap(),
    );
    let schema = Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("y", DataType::Int64, false),
    ]));
    let right = Frame::from_batch(
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["b", "c", "c"])),
                Arc::new(Int64Array::from(vec![20, 30, 31])),
            ],
        )
        .unwrap(),
    );

    let merged = left
        .merge_on(&right, &["key".to_string()], JoinHow::Inner, &JoinSuffixes::none())
        .unwrap();
    assert_eq!(merged.column_names(), vec!["key".to_string(), "x".to_string(), "y".to_string()]);
    assert_eq!(merged.num_rows(), 3);
    assert_eq!(index_of(&merged), vec![0, 1, 2]);
}

#[test]
fn test_concat_rejects_different_schemas() {
    let a = create_frame(vec![1], "a", vec![1]);
    let b = create_frame(vec![2], "b", vec![2]);
    let err = Frame::concat(&[a, b]).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
}

#[test]
fn test_loc_selects_inclusive_range() {
    let frame = create_frame(vec![1, 2, 3, 4, 5], "a", vec![10, 20, 30, 40, 50]);
    let sliced = frame.loc(&ScalarValue::Int64(2), &ScalarValue::Int64(4)).unwrap();
    assert_eq!(index_of(&sliced), vec![2, 3, 4]);
}

#[test]
fn test_loc_keeps_null_index_rows_only_from_null_bound() {
    let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![10, 20, 30, 40]))]).unwrap();
    let index = Int64Array::from(vec![None, Some(1), Some(2), None]);
    let frame = Frame::new(Arc::new(index), batch).unwrap();

    let from_null = frame.loc(&ScalarValue::Null, &ScalarValue::Int64(1)).unwrap();
    assert_eq!(from_null.num_rows(), 3);
    assert_eq!(from_null.index().null_count(), 2);

    let only_null = frame.loc(&ScalarValue::Null, &ScalarValue::Null).unwrap();
    assert_eq!(only_null.num_rows(), 2);

    let values = frame.loc(&ScalarValue::Int64(1), &ScalarValue::Int64(2)).unwrap();
    assert_eq!(values.index().null_count(), 0);
    assert_eq!(index_of(&values), vec![1, 2]);
}

#[test]
fn test_membership_filters_on_narrow_types() {
    let schema = Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, true)]));
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(StringArray::from(vec![Some("x"), None, Some("y"), Some("x")]))],
    )
    .unwrap();
    let index = arrow::array::Int32Array::from(vec![3, 1, 4, 1]);
    let frame = Frame::new(Arc::new(index), batch).unwrap();

    let keys = [ScalarValue::Int64(1), ScalarValue::Int64(9)].into_iter().collect();
    assert_eq!(frame.filter_index_in(&keys).unwrap().num_rows(), 2);

    let keys = [ScalarValue::from("x"), ScalarValue::Null].into_iter().collect();
    let kept = frame.filter_values_in("s", &keys).unwrap();
    assert_eq!(kept.num_rows(), 3);
    assert_eq!(kept.column("s").unwrap().null_count(), 1);
}

#[test]
fn test_query_expression() {
    let frame = create_frame(vec![0, 1, 2, 3], "a", vec![5, 15, 25, 35]);
    let expr = Expr::parse("a > 10 and (a < 30 or index == 3)").unwrap();
    let filtered = frame.query(&expr).unwrap();
    assert_eq!(index_of(&filtered), vec![1, 2, 3]);
}

#[test]
fn test_query_rejects_environment_references() {
    let err = Expr::parse("a > @limit").unwrap_err();
    assert_eq!(err.code(), Code::NotImplemented);
}

#[test]
fn test_query_literals_and_operand_order() {
    let expr = Expr::parse("5 < a").unwrap();
    assert_eq!(
        expr,
        Expr::Compare {
            column: "a".to_string(),
            op: CmpOp::Gt,
            value: ScalarValue::Int64(5),
        }
    );

    let expr = Expr::parse("(b != 'x' or b == \"y\") and c >= -2.5").unwrap();
    assert_eq!(expr.columns(), vec!["b", "b", "c"]);
    match expr {
        Expr::And(lhs, rhs) => {
            assert!(matches!(*lhs, Expr::Or(_, _)));
            assert_eq!(
                *rhs,
                Expr::Compare {
                    column: "c".to_string(),
                    op: CmpOp::GtEq,
                    value: ScalarValue::Float64(-2.5),
                }
            );
        }
        other => panic!("expected a conjunction, got {}", other),
    }
}

#[test]
fn test_query_rejects_unsupported_expressions() {
    for input in ["a >", "a + 1 > 2", "1 < 2", "upper(b) == 'X'", "a > 1 a"] {
        let err = Expr::parse(input).unwrap_err();
        assert_eq!(err.code(), Code::Invalid, "query '{}'", input);
    }
}

#[test]
fn test_query_string_comparison() {
    let schema = Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, false)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["ant", "bee", "cat"]))]).unwrap();
    let frame = Frame::from_batch(batch);
    let filtered = frame.query(&Expr::parse("s >= 'bee'").unwrap()).unwrap();
    assert_eq!(index_of(&filtered), vec![1, 2]);
}

#[test]
fn test_unique_index_is_key_set() {
    let frame = create_frame(vec![3, 1, 3, 2], "a", vec![0, 0, 0, 0]);
    let keys: Vec<ScalarValue> = frame.unique_index().unwrap().into_iter().collect();
    assert_eq!(keys, vec![ScalarValue::Int64(1), ScalarValue::Int64(2), ScalarValue::Int64(3)]);
}
