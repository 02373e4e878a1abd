use async_trait::async_trait;
use flowcore::{NodeContext, NodeError, NodeExecutor, NodeMetadata, NodeOutcome};

/// Logs a message and the current context keys, then passes the context on
pub struct DebugNode;

#[async_trait]
impl NodeExecutor for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutcome, NodeError> {
        let message = ctx
            .config
            .get("message")
            .or_else(|| ctx.context.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");

        tracing::info!(
            execution_id = %ctx.execution_id,
            node_id = %ctx.node_id,
            "DEBUG: {}",
            message
        );
        ctx.events.info(format!("DEBUG: {}", message));

        let mut keys: Vec<&String> = ctx.context.keys().collect();
        keys.sort();
        for key in keys {
            ctx.events.info(format!("  {}: {}", key, ctx.context[key]));
        }

        Ok(ctx.pass_through())
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs a message and the context for debugging".to_string(),
            category: "debug".to_string(),
            outputs: vec![],
        }
    }
}
