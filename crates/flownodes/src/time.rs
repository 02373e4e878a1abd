use async_trait::async_trait;
use flowcore::{NodeContext, NodeError, NodeExecutor, NodeMetadata, NodeOutcome};
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutcome, NodeError> {
        let delay_ms = match ctx.config.get("delay_ms") {
            Some(value) => value.as_f64().filter(|ms| *ms >= 0.0).ok_or_else(|| {
                NodeError::Configuration("delay_ms must be a non-negative number".to_string())
            })? as u64,
            None => DEFAULT_DELAY_MS,
        };

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => Ok(ctx.pass_through()),
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            outputs: vec![],
        }
    }
}
