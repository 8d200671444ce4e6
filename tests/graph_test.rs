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

//! Task graph and executor tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use partframe::graph::executor::plan;
use partframe::graph::{tokenize, Datum, Executor, Graph, GraphBuilder, LocalExecutor, Task, TaskKey, ThreadedExecutor};
use partframe::{Code, FrameError, ScalarValue};

fn int(v: i64) -> Datum {
    Datum::Scalar(ScalarValue::Int64(v))
}

fn add_task(deps: Vec<TaskKey>) -> Task {
    Task::apply("add", deps, |inputs| {
        let mut total = 0;
        for d in inputs {
            total += d.as_scalar()?.to_i64().unwrap_or(0);
        }
        Ok(Datum::Scalar(ScalarValue::Int64(total)))
    })
}

/// `x_i = i` for four inputs, `y_0 = x_0 + x_1`, `y_1 = x_2 + x_3`, `z = y_0 + y_1`
fn create_diamond() -> Graph {
    let mut builder = GraphBuilder::new(&Graph::new());
    for i in 0..4 {
        builder.insert(TaskKey::new("x", i), Task::Const(int(i as i64)));
    }
    builder.insert(TaskKey::new("y", 0), add_task(vec![TaskKey::new("x", 0), TaskKey::new("x", 1)]));
    builder.insert(TaskKey::new("y", 1), add_task(vec![TaskKey::new("x", 2), TaskKey::new("x", 3)]));
    builder.insert(TaskKey::new("z", 0), add_task(vec![TaskKey::new("y", 0), TaskKey::new("y", 1)]));
    builder.build()
}

#[test]
fn test_tokenize_is_deterministic() {
    let a = tokenize(&("sort", "table-1", 3)).unwrap();
    let b = tokenize(&("sort", "table-1", 3)).unwrap();
    let c = tokenize(&("sort", "table-1", 4)).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 32);
    assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
}

#[test]
fn test_graph_layers() {
    let graph = create_diamond();
    assert_eq!(graph.len(), 7);
    assert_eq!(graph.layer_len("x"), 4);
    assert_eq!(graph.layer_len("y"), 2);
    assert_eq!(graph.layer_len("missing"), 0);
    assert!(graph.contains(&TaskKey::new("z", 0)));
}

#[test]
fn test_builder_does_not_modify_base() {
    let base = create_diamond();
    let mut builder = GraphBuilder::new(&base);
    builder.insert(TaskKey::new("w", 0), Task::Alias(TaskKey::new("z", 0)));
    assert_eq!(builder.pending_len(), 1);
    let extended = builder.build();

    assert_eq!(base.len(), 7);
    assert_eq!(extended.len(), 8);
}

#[test]
fn test_plan_levels() {
    let graph = create_diamond();
    let levels = plan(&graph, &[TaskKey::new("z", 0)]).unwrap();
    assert_eq!(levels.len(), 3);
    assert_eq!(levels[0].len(), 4);
    assert_eq!(levels[1].len(), 2);
    assert_eq!(levels[2], vec![TaskKey::new("z", 0)]);
}

#[test]
fn test_plan_culls_unrequested_tasks() {
    let graph = create_diamond();
    let levels = plan(&graph, &[TaskKey::new("y", 0)]).unwrap();
    let total: usize = levels.iter().map(Vec::len).sum();
    assert_eq!(total, 3, "only x_0, x_1 and y_0 are needed");
}

#[test]
fn test_local_executor() {
    partframe::util::init_logging();
    let graph = create_diamond();
    let results = LocalExecutor::new()
        .get(&graph, &[TaskKey::new("z", 0), TaskKey::new("y", 1)])
        .unwrap();
    assert_eq!(results[0].as_scalar().unwrap(), &ScalarValue::Int64(6));
    assert_eq!(results[1].as_scalar().unwrap(), &ScalarValue::Int64(5));
}

#[test]
fn test_shared_tasks_run_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut builder = GraphBuilder::new(&Graph::new());
    builder.insert(
        TaskKey::new("shared", 0),
        Task::apply("count", vec![], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(int(1))
        }),
    );
    for i in 0..3 {
        builder.insert(TaskKey::new("user", i), add_task(vec![TaskKey::new("shared", 0)]));
    }
    let graph = builder.build();

    let keys: Vec<TaskKey> = (0..3).map(|i| TaskKey::new("user", i)).collect();
    LocalExecutor::new().get(&graph, &keys).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_key_is_invalid() {
    let graph = create_diamond();
    let err = LocalExecutor::new().get(&graph, &[TaskKey::new("nope", 0)]).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
}

#[test]
fn test_cycle_is_invalid() {
    let mut builder = GraphBuilder::new(&Graph::new());
    builder.insert(TaskKey::new("a", 0), Task::Alias(TaskKey::new("b", 0)));
    builder.insert(TaskKey::new("b", 0), Task::Alias(TaskKey::new("a", 0)));
    let graph = builder.build();

    let err = plan(&graph, &[TaskKey::new("a", 0)]).unwrap_err();
    assert_eq!(err.code(), Code::Invalid);
}

#[test]
fn test_task_failure_names_the_task() {
    let mut builder = GraphBuilder::new(&Graph::new());
    builder.insert(
        TaskKey::new("broken", 2),
        Task::apply("fail", vec![], |_| Err(FrameError::new(Code::ValueError, "boom"))),
    );
    let graph = builder.build();

    let err = LocalExecutor::new().get(&graph, &[TaskKey::new("broken", 2)]).unwrap_err();
    assert_eq!(err.code(), Code::ExecutionError);
    match err {
        FrameError::Execution { key, message } => {
            assert!(key.contains("broken"));
            assert!(message.contains("boom"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_threaded_executor_matches_local() {
    let graph = create_diamond();
    let keys = vec![TaskKey::new("z", 0), TaskKey::new("y", 0), TaskKey::new("x", 3)];
    let local = LocalExecutor::new().get(&graph, &keys).unwrap();
    let executor = ThreadedExecutor::new(4).unwrap();
    assert_eq!(executor.threads(), 4);
    let threaded = executor.get(&graph, &keys).unwrap();

    for (l, t) in local.iter().zip(&threaded) {
        assert_eq!(l.as_scalar().unwrap(), t.as_scalar().unwrap());
    }
}

#[test]
fn test_threaded_executor_reports_failures() {
    let mut builder = GraphBuilder::new(&Graph::new());
    builder.insert(
        TaskKey::new("broken", 0),
        Task::apply("fail", vec![], |_| Err(FrameError::new(Code::ValueError, "boom"))),
    );
    let graph = builder.build();
    let err = ThreadedExecutor::new(2)
        .unwrap()
        .get(&graph, &[TaskKey::new("broken", 0)])
        .unwrap_err();
    assert_eq!(err.code(), Code::ExecutionError);
}
