use flowcore::{ExecutionStatus, Value, Workflow};
use flownodes::standard_registry;
use flowruntime::{FlowRuntime, RuntimeConfig};
use serde_json::json;
use std::sync::Arc;

fn approval_workflow() -> Workflow {
    serde_json::from_value(json!({
        "id": "expense-approval",
        "name": "Expense approval",
        "nodes": [
            {"id": "start", "type": "trigger.manual"},
            {"id": "parse", "type": "transform.json_parse",
             "data": {"source": "payload", "target": "expense"}},
            {"id": "check", "type": "flow.condition",
             "data": {"field": "expense.amount", "operator": "gt", "value": 100}},
            {"id": "approval", "type": "flow.wait", "data": {"event": "manager_approval"}},
            {"id": "large", "type": "transform.set", "data": {"values": {"route": "manual"}}},
            {"id": "small", "type": "transform.set", "data": {"values": {"route": "auto"}}},
            {"id": "log", "type": "debug.log", "data": {"message": "done"}}
        ],
        "connections": [
            {"fromNodeId": "start", "toNodeId": "parse"},
            {"fromNodeId": "parse", "toNodeId": "check"},
            {"fromNodeId": "check", "toNodeId": "approval", "fromOutput": "yes"},
            {"fromNodeId": "check", "toNodeId": "small", "fromOutput": "no"},
            {"fromNodeId": "approval", "toNodeId": "large"},
            {"fromNodeId": "large", "toNodeId": "log"},
            {"fromNodeId": "small", "toNodeId": "log"}
        ]
    }))
    .unwrap()
}

fn runtime() -> FlowRuntime {
    FlowRuntime::with_registry(Arc::new(standard_registry()), RuntimeConfig::default())
}

fn payload(amount: i64) -> flowcore::Context {
    flowcore::context_from_json(json!({
        "payload": json!({"amount": amount, "by": "sam"}).to_string()
    }))
    .unwrap()
}

#[tokio::test]
async fn test_small_expense_takes_automatic_route() {
    let runtime = runtime();
    let wf = approval_workflow();

    let result = runtime.run(&wf, "user-1", payload(20)).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.output.get("route"), Some(&Value::from("auto")));
    let record = runtime.get_state(result.execution_id).await.unwrap();
    let nodes: Vec<&str> = record.checkpoints.iter().map(|c| c.node_id.as_str()).collect();
    assert_eq!(nodes, vec!["parse", "check", "small", "log"]);
}

#[tokio::test]
async fn test_large_expense_waits_for_approval() {
    let runtime = runtime();
    runtime.register_workflow(approval_workflow()).await.unwrap();

    let paused = runtime
        .run_workflow("expense-approval", "user-1", payload(500))
        .await
        .unwrap();
    assert_eq!(paused.status, ExecutionStatus::Paused);
    assert_eq!(
        paused.output.get("waiting_for"),
        Some(&Value::from("manager_approval"))
    );

    let input = flowcore::context_from_json(json!({"approved_by": "kim"})).unwrap();
    let done = runtime
        .resume_with_input(paused.execution_id, input)
        .await
        .unwrap();

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.output.get("route"), Some(&Value::from("manual")));
    assert_eq!(done.output.get("approved_by"), Some(&Value::from("kim")));

    let record = runtime.get_state(paused.execution_id).await.unwrap();
    let nodes: Vec<&str> = record.checkpoints.iter().map(|c| c.node_id.as_str()).collect();
    assert_eq!(nodes, vec!["parse", "check", "approval", "large", "log"]);
}

#[test]
fn test_standard_registry_lists_every_node() {
    let registry = standard_registry();
    assert_eq!(
        registry.list_node_types(),
        vec![
            "debug.log",
            "flow.condition",
            "flow.wait",
            "http.request",
            "time.delay",
            "transform.json_parse",
            "transform.json_stringify",
            "transform.set",
        ]
    );
    let condition = registry.get_metadata("flow.condition").unwrap();
    assert_eq!(condition.outputs.len(), 2);
}
