use async_trait::async_trait;
use flowcore::{NodeContext, NodeError, NodeExecutor, NodeMetadata, NodeOutcome};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Registry of available node types
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register a node executor, replacing any previous one for its type
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let node_type = executor.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.executors.insert(node_type, executor);
    }

    /// Register a plain async function as the executor for `node_type`
    pub fn register_fn<F, Fut>(&mut self, node_type: impl Into<String>, f: F)
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NodeOutcome, NodeError>> + Send + 'static,
    {
        self.register(Arc::new(FnNode::new(node_type, f)));
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.executors.get(node_type).map(|e| e.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type NodeFn = dyn Fn(NodeContext) -> BoxFuture<'static, Result<NodeOutcome, NodeError>> + Send + Sync;

/// Adapts an async closure to [`NodeExecutor`].
pub struct FnNode {
    node_type: String,
    func: Box<NodeFn>,
}

impl FnNode {
    pub fn new<F, Fut>(node_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NodeOutcome, NodeError>> + Send + 'static,
    {
        Self {
            node_type: node_type.into(),
            func: Box::new(move |ctx| Box::pin(f(ctx))),
        }
    }
}

#[async_trait]
impl NodeExecutor for FnNode {
    fn node_type(&self) -> &str {
        &self.node_type
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutcome, NodeError> {
        (self.func)(ctx).await
    }
}
