#![allow(dead_code)]

use flowcore::{Context, NodeContext, NodeError, NodeOutcome, NodeSpec, Value, Workflow};
use flowruntime::{FlowRuntime, NodeRegistry, RuntimeConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Registry with the node types the scheduler tests use.
///
/// - `test.step` appends its node id to the `trail` array
/// - `test.choose` selects the output named by its `pick` config
/// - `test.wait` pauses
/// - `test.fail` always fails
/// - `test.flaky` fails transiently on its first call, then behaves like `test.step`
/// - `test.hang` never finishes
pub fn test_registry(flaky_calls: Arc<AtomicUsize>) -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    registry.register_fn("test.step", |ctx: NodeContext| async move {
        Ok(NodeOutcome::Continue(record_visit(&ctx)))
    });

    registry.register_fn("test.choose", |ctx: NodeContext| async move {
        let output = ctx.require_config_str("pick")?.to_string();
        Ok(NodeOutcome::Branch {
            output,
            context: record_visit(&ctx),
        })
    });

    registry.register_fn("test.wait", |ctx: NodeContext| async move {
        Ok(NodeOutcome::Pause(record_visit(&ctx)))
    });

    registry.register_fn("test.fail", |_ctx: NodeContext| async move {
        Err(NodeError::ExecutionFailed("boom".to_string()))
    });

    registry.register_fn("test.flaky", move |ctx: NodeContext| {
        let calls = flaky_calls.clone();
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(NodeError::Transient("upstream unavailable".to_string()));
            }
            Ok(NodeOutcome::Continue(record_visit(&ctx)))
        }
    });

    registry.register_fn("test.hang", |_ctx: NodeContext| async move {
        std::future::pending::<()>().await;
        Ok(NodeOutcome::Continue(Context::new()))
    });

    registry
}

pub fn runtime() -> FlowRuntime {
    runtime_with(RuntimeConfig::default())
}

pub fn runtime_with(config: RuntimeConfig) -> FlowRuntime {
    init_tracing();
    let registry = test_registry(Arc::new(AtomicUsize::new(0)));
    FlowRuntime::with_registry(Arc::new(registry), config)
}

pub fn short_timeout() -> RuntimeConfig {
    RuntimeConfig::default().with_workflow_timeout(Duration::from_millis(500))
}

/// Build a workflow from `(id, type)` nodes and `(from, output, to)` edges.
pub fn workflow(id: &str, nodes: &[(&str, &str)], edges: &[(&str, &str, &str)]) -> Workflow {
    let mut wf = Workflow::new(id).with_id(id);
    for (node_id, node_type) in nodes {
        wf.add_node(NodeSpec::new(*node_id, *node_type));
    }
    for (from, output, to) in edges {
        wf.connect(*from, *output, *to, "default");
    }
    wf
}

pub fn context(pairs: &[(&str, Value)]) -> Context {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn trail(ctx: &Context) -> Vec<String> {
    match ctx.get("trail") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

pub fn checkpoint_nodes(record: &flowcore::ExecutionRecord) -> Vec<&str> {
    record
        .checkpoints
        .iter()
        .map(|cp| cp.node_id.as_str())
        .collect()
}

fn record_visit(ctx: &NodeContext) -> Context {
    let mut context = ctx.context.clone();
    let mut visited = match context.remove("trail") {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    visited.push(Value::from(ctx.node_id.as_str()));
    context.insert("trail".to_string(), Value::Array(visited));
    context
}
