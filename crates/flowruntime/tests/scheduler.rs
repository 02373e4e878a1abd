mod common;

use common::*;
use flowcore::{
    CyclePolicy, ExecutionEvent, ExecutionStatus, FlowError, NodeSpec, Value, WorkflowError,
};
use flowruntime::RuntimeConfig;

#[tokio::test]
async fn test_linear_workflow_checkpoints_every_node() {
    let runtime = runtime();
    let wf = workflow(
        "linear",
        &[
            ("a", "test.step"),
            ("b", "test.step"),
            ("c", "test.step"),
            ("d", "test.step"),
        ],
        &[("a", "default", "b"), ("b", "default", "c"), ("c", "default", "d")],
    );

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();
    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(trail(&result.output), vec!["a", "b", "c", "d"]);

    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(checkpoint_nodes(&record), vec!["a", "b", "c", "d"]);
    let steps: Vec<u32> = record.checkpoints.iter().map(|cp| cp.step_number).collect();
    assert_eq!(steps, vec![1, 2, 3, 4]);
    assert_eq!(record.header.current_step, 4);
    assert_eq!(record.header.total_steps, 4);
    assert_eq!(record.header.user_id, "user-1");
    assert!(record.header.error.is_none());
}

#[tokio::test]
async fn test_initial_context_reaches_nodes_and_checkpoints() {
    let runtime = runtime();
    let wf = workflow("seeded", &[("a", "test.step")], &[]);

    let result = runtime
        .run(&wf, "user-1", context(&[("order", Value::from(42i64))]))
        .await
        .unwrap();

    assert_eq!(result.output.get("order"), Some(&Value::from(42i64)));
    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(
        record.checkpoints[0].context.get("order"),
        Some(&Value::from(42i64))
    );
}

#[tokio::test]
async fn test_branch_follows_only_selected_output() {
    let runtime = runtime();
    let mut wf = workflow(
        "branch",
        &[("y", "test.step"), ("n", "test.step"), ("after", "test.step")],
        &[("c", "yes", "y"), ("c", "no", "n"), ("y", "default", "after")],
    );
    wf.nodes
        .insert(0, NodeSpec::new("c", "test.choose").with_config("pick", "yes"));

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();
    assert!(result.success);

    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(checkpoint_nodes(&record), vec!["c", "y", "after"]);
    assert!(!trail(&result.output).contains(&"n".to_string()));
}

#[tokio::test]
async fn test_trigger_condition_example() {
    let runtime = runtime();
    let mut wf = workflow(
        "trigger-cond",
        &[("t", "trigger.initial"), ("a", "test.step")],
        &[
            ("t", "default", "a"),
            ("a", "default", "b"),
            ("b", "yes", "c"),
            ("b", "no", "d"),
        ],
    );
    wf.add_node(NodeSpec::new("b", "test.choose").with_config("pick", "yes"));
    wf.add_node(NodeSpec::new("c", "test.step"));
    wf.add_node(NodeSpec::new("d", "test.step"));

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(checkpoint_nodes(&record), vec!["a", "b", "c"]);
    assert_eq!(record.header.total_steps, 4);
}

#[tokio::test]
async fn test_branch_without_selection_follows_every_edge() {
    let runtime = runtime();
    let wf = workflow(
        "no-selection",
        &[("s", "test.step"), ("y", "test.step"), ("n", "test.step")],
        &[("s", "yes", "y"), ("s", "no", "n")],
    );

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert!(result.success);
    assert_eq!(trail(&result.output), vec!["s", "y", "n"]);
}

#[tokio::test]
async fn test_selection_from_non_branch_node_is_ignored() {
    let runtime = runtime();
    let mut wf = workflow(
        "plain-selection",
        &[("x", "test.step"), ("z", "test.step")],
        &[("c", "default", "x"), ("c", "default", "z")],
    );
    wf.nodes
        .insert(0, NodeSpec::new("c", "test.choose").with_config("pick", "yes"));

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert!(result.success);
    assert_eq!(trail(&result.output), vec!["c", "x", "z"]);
}

#[tokio::test]
async fn test_diamond_join_runs_once() {
    let runtime = runtime();
    let wf = workflow(
        "diamond",
        &[
            ("a", "test.step"),
            ("b", "test.step"),
            ("c", "test.step"),
            ("join", "test.step"),
        ],
        &[
            ("a", "default", "b"),
            ("a", "default", "c"),
            ("b", "default", "join"),
            ("c", "default", "join"),
        ],
    );

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert_eq!(trail(&result.output), vec!["a", "b", "c", "join"]);
    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(record.checkpoints.len(), 4);
}

#[tokio::test]
async fn test_cycle_completes_in_bounded_steps() {
    let runtime = runtime();
    let wf = workflow(
        "cycle",
        &[("t", "trigger.manual"), ("a", "test.step"), ("b", "test.step")],
        &[("t", "default", "a"), ("a", "default", "b"), ("b", "default", "a")],
    );

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(checkpoint_nodes(&record), vec!["a", "b"]);
}

#[tokio::test]
async fn test_cycle_rejected_under_reject_policy() {
    let runtime = runtime_with(RuntimeConfig::default().with_cycle_policy(CyclePolicy::Reject));
    let wf = workflow(
        "cycle",
        &[("t", "trigger.manual"), ("a", "test.step"), ("b", "test.step")],
        &[("t", "default", "a"), ("a", "default", "b"), ("b", "default", "a")],
    );

    let err = runtime.run(&wf, "user-1", context(&[])).await.unwrap_err();
    match err {
        FlowError::Workflow(WorkflowError::CyclicDependency { nodes }) => {
            assert_eq!(nodes, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected cyclic dependency, got {other:?}"),
    }
    assert!(runtime.list_executions(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_workflow_setting_overrides_cycle_policy() {
    let runtime = runtime();
    let mut wf = workflow(
        "self-loop",
        &[("a", "test.step")],
        &[("a", "default", "a")],
    );
    wf.settings.cycle_policy = Some(CyclePolicy::Reject);

    let err = runtime.run(&wf, "user-1", context(&[])).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::CyclicDependency { .. })
    ));
}

#[tokio::test]
async fn test_node_failure_stops_downstream() {
    let runtime = runtime();
    let wf = workflow(
        "failing",
        &[("a", "test.step"), ("x", "test.fail"), ("b", "test.step")],
        &[("a", "default", "x"), ("x", "default", "b")],
    );

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert!(!result.success);
    assert!(!result.retryable);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("boom"));

    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(record.status(), ExecutionStatus::Failed);
    assert_eq!(checkpoint_nodes(&record), vec!["a", "x"]);
    let last = record.last_checkpoint().unwrap();
    assert!(last.is_error());
    assert_eq!(last.step_number, 1);
    // Resuming starts downstream of the failed node.
    assert_eq!(last.pending, vec!["b".to_string()]);
    assert!(record.header.error.as_deref().unwrap().contains("boom"));
}

#[tokio::test]
async fn test_missing_executor_is_a_non_retryable_failure() {
    let runtime = runtime();
    let wf = workflow(
        "unknown-type",
        &[("a", "test.step"), ("m", "does.not.exist")],
        &[("a", "default", "m")],
    );

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert!(!result.success);
    assert!(!result.retryable);
    let record = runtime.get_state(result.execution_id).await.unwrap();
    let last = record.last_checkpoint().unwrap();
    assert_eq!(last.node_id, "m");
    assert_eq!(
        last.error.as_deref(),
        Some(WorkflowError::UnknownNodeType("does.not.exist".to_string()).to_string().as_str())
    );
    assert!(last.error.as_deref().unwrap().contains("No executor registered"));
}

#[tokio::test]
async fn test_transient_failure_is_retryable() {
    let runtime = runtime();
    let wf = workflow("flaky", &[("f", "test.flaky")], &[]);

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert!(!result.success);
    assert!(result.retryable);
}

#[tokio::test]
async fn test_invalid_definition_never_creates_a_record() {
    let runtime = runtime();
    let wf = workflow(
        "dangling",
        &[("a", "test.step")],
        &[("a", "default", "ghost")],
    );

    let err = runtime.run(&wf, "user-1", context(&[])).await.unwrap_err();

    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::InvalidConnection(_))
    ));
    assert!(runtime.list_executions(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_registered_workflow_runs_by_id() {
    let runtime = runtime();
    let wf = workflow("registered", &[("a", "test.step")], &[]);
    runtime.register_workflow(wf).await.unwrap();

    let result = runtime
        .run_workflow("registered", "user-1", context(&[]))
        .await
        .unwrap();
    assert!(result.success);

    let err = runtime
        .run_workflow("missing", "user-1", context(&[]))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Workflow(WorkflowError::NotFound(_))));

    let listed = runtime.list_executions(Some("registered")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, result.execution_id);
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let runtime = runtime();
    let mut events = runtime.subscribe_events();
    let wf = workflow(
        "events",
        &[("a", "test.step"), ("b", "test.step")],
        &[("a", "default", "b")],
    );

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.execution_id(), result.execution_id);
        kinds.push(match event {
            ExecutionEvent::WorkflowStarted { resumed, .. } => {
                assert!(!resumed);
                "started"
            }
            ExecutionEvent::NodeStarted { .. } => "node_started",
            ExecutionEvent::NodeCompleted { .. } => "node_completed",
            ExecutionEvent::WorkflowFinished { status, .. } => {
                assert_eq!(status, ExecutionStatus::Completed);
                "finished"
            }
            _ => "other",
        });
    }

    assert_eq!(
        kinds,
        vec![
            "started",
            "node_started",
            "node_completed",
            "node_started",
            "node_completed",
            "finished",
        ]
    );
}
