use flowcore::{
    Context, EventBus, ExecutionId, NodeContext, NodeError, NodeExecutor, NodeOutcome, ToolHandles,
    Value,
};
use flownodes::{
    ConditionNode, DebugNode, DelayNode, HttpRequestNode, JsonParseNode, JsonStringifyNode,
    SetNode, WaitNode,
};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// Helper function to create a test context
fn create_test_context(config: serde_json::Value, context: serde_json::Value) -> NodeContext {
    let event_bus = EventBus::new(100);
    let execution_id = ExecutionId::new_v4();

    NodeContext {
        node_id: "node".to_string(),
        node_name: "node".to_string(),
        execution_id,
        workflow_id: "wf".to_string(),
        user_id: "tester".to_string(),
        config: flowcore::context_from_json(config).unwrap_or_default(),
        context: flowcore::context_from_json(context).unwrap_or_default(),
        tools: ToolHandles::new(),
        events: event_bus.create_emitter(execution_id, "node".to_string()),
        cancellation: CancellationToken::new(),
    }
}

fn continued(outcome: NodeOutcome) -> Context {
    match outcome {
        NodeOutcome::Continue(ctx) => ctx,
        other => panic!("expected Continue, got {other:?}"),
    }
}

#[tokio::test]
async fn test_debug_passes_context_through() {
    let ctx = create_test_context(
        serde_json::json!({"message": "hello"}),
        serde_json::json!({"a": 1}),
    );

    let out = continued(DebugNode.execute(ctx).await.unwrap());
    assert_eq!(out.get("a"), Some(&Value::from(1i64)));
    assert_eq!(out.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delay_waits_then_continues() {
    let ctx = create_test_context(serde_json::json!({"delay_ms": 250}), serde_json::json!({}));

    let started = tokio::time::Instant::now();
    DelayNode.execute(ctx).await.unwrap();
    assert!(started.elapsed() >= std::time::Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn test_delay_stops_on_cancellation() {
    let ctx = create_test_context(serde_json::json!({"delay_ms": 60_000}), serde_json::json!({}));
    ctx.cancellation.cancel();

    let err = DelayNode.execute(ctx).await.unwrap_err();
    assert_eq!(err, NodeError::Cancelled);
}

#[tokio::test]
async fn test_delay_rejects_bad_config() {
    let ctx = create_test_context(serde_json::json!({"delay_ms": "soon"}), serde_json::json!({}));
    assert!(matches!(
        DelayNode.execute(ctx).await,
        Err(NodeError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_set_merges_values() {
    let ctx = create_test_context(
        serde_json::json!({"values": {"status": "approved", "a": 2}}),
        serde_json::json!({"a": 1, "keep": true}),
    );

    let out = continued(SetNode.execute(ctx).await.unwrap());
    assert_eq!(out.get("status"), Some(&Value::from("approved")));
    assert_eq!(out.get("a"), Some(&Value::from(2i64)));
    assert_eq!(out.get("keep"), Some(&Value::from(true)));

    let mut bad = HashMap::new();
    bad.insert("values".to_string(), Value::from("nope"));
    assert!(SetNode.validate_config(&bad).is_err());
}

#[tokio::test]
async fn test_json_parse_and_stringify() {
    let ctx = create_test_context(
        serde_json::json!({"target": "order"}),
        serde_json::json!({"json": "{\"total\": 3, \"items\": [\"a\"]}"}),
    );
    let parsed = continued(JsonParseNode.execute(ctx).await.unwrap());
    let order = parsed.get("order").and_then(Value::as_object).unwrap();
    assert_eq!(order.get("total"), Some(&Value::from(3i64)));

    let ctx = create_test_context(
        serde_json::json!({"source": "order"}),
        serde_json::Value::Object(
            parsed
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        ),
    );
    let out = continued(JsonStringifyNode.execute(ctx).await.unwrap());
    let text = out.get("json").and_then(Value::as_str).unwrap();
    let round: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(round, serde_json::json!({"total": 3, "items": ["a"]}));
}

#[tokio::test]
async fn test_json_parse_errors() {
    let ctx = create_test_context(serde_json::json!({}), serde_json::json!({"json": 5}));
    assert!(matches!(
        JsonParseNode.execute(ctx).await,
        Err(NodeError::InvalidInputType { .. })
    ));

    let ctx = create_test_context(serde_json::json!({}), serde_json::json!({"json": "{oops"}));
    assert!(matches!(
        JsonParseNode.execute(ctx).await,
        Err(NodeError::ExecutionFailed(_))
    ));

    let ctx = create_test_context(serde_json::json!({}), serde_json::json!({}));
    assert_eq!(
        JsonParseNode.execute(ctx).await.unwrap_err(),
        NodeError::MissingInput("json".to_string())
    );
}

#[tokio::test]
async fn test_condition_selects_output() {
    let config = serde_json::json!({"field": "order.total", "operator": "gt", "value": 100});

    let ctx = create_test_context(config.clone(), serde_json::json!({"order": {"total": 250}}));
    match ConditionNode.execute(ctx).await.unwrap() {
        NodeOutcome::Branch { output, .. } => assert_eq!(output, "yes"),
        other => panic!("expected Branch, got {other:?}"),
    }

    let ctx = create_test_context(config, serde_json::json!({"order": {"total": 5}}));
    match ConditionNode.execute(ctx).await.unwrap() {
        NodeOutcome::Branch { output, .. } => assert_eq!(output, "no"),
        other => panic!("expected Branch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_condition_custom_outputs_and_validation() {
    let ctx = create_test_context(
        serde_json::json!({"field": "flag", "operator": "truthy",
                           "true_output": "on", "false_output": "off"}),
        serde_json::json!({}),
    );
    match ConditionNode.execute(ctx).await.unwrap() {
        NodeOutcome::Branch { output, .. } => assert_eq!(output, "off"),
        other => panic!("expected Branch, got {other:?}"),
    }

    let ctx = create_test_context(
        serde_json::json!({"field": "x", "operator": "gt"}),
        serde_json::json!({"x": 1}),
    );
    assert!(matches!(
        ConditionNode.execute(ctx).await,
        Err(NodeError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_wait_pauses_and_records_event() {
    let ctx = create_test_context(
        serde_json::json!({"event": "manager_approval"}),
        serde_json::json!({"a": 1}),
    );

    match WaitNode.execute(ctx).await.unwrap() {
        NodeOutcome::Pause(out) => {
            assert_eq!(out.get("waiting_for"), Some(&Value::from("manager_approval")));
            assert_eq!(out.get("a"), Some(&Value::from(1i64)));
        }
        other => panic!("expected Pause, got {other:?}"),
    }
}

/// One-shot HTTP server answering every connection with `status` and `body`.
async fn serve_once(status: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{}/orders", addr)
}

#[tokio::test]
async fn test_http_request_stores_response() {
    let url = serve_once("200 OK", r#"{"ok":true}"#).await;
    let ctx = create_test_context(
        serde_json::json!({"url": url, "method": "post", "body": {"id": 7}, "target": "reply"}),
        serde_json::json!({}),
    );

    let out = continued(HttpRequestNode::new().execute(ctx).await.unwrap());
    let reply = out.get("reply").and_then(Value::as_object).unwrap();
    assert_eq!(reply.get("status"), Some(&Value::from(200i64)));
    let body = reply.get("body").and_then(Value::as_object).unwrap();
    assert_eq!(body.get("ok"), Some(&Value::from(true)));
}

#[tokio::test]
async fn test_http_server_error_is_transient() {
    let url = serve_once("503 Service Unavailable", "{}").await;
    let ctx = create_test_context(serde_json::json!({"url": url}), serde_json::json!({}));

    let err = HttpRequestNode::new().execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Transient(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_http_configuration_errors() {
    let ctx = create_test_context(serde_json::json!({}), serde_json::json!({}));
    assert_eq!(
        HttpRequestNode::new().execute(ctx).await.unwrap_err(),
        NodeError::MissingInput("url".to_string())
    );

    let ctx = create_test_context(
        serde_json::json!({"url": "http://127.0.0.1:9", "method": "BREW"}),
        serde_json::json!({}),
    );
    assert!(matches!(
        HttpRequestNode::new().execute(ctx).await,
        Err(NodeError::Configuration(_))
    ));
}
