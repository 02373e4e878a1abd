use crate::{
    events::EventEmitter, Context, ExecutionId, NodeError, NodeId, ToolHandles, Value, WorkflowId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Reserved context key through which untyped executors request a pause.
pub const PAUSE_KEY: &str = "__pause";

/// Reserved context key through which untyped executors select a branch.
pub const SELECTED_BRANCH_KEY: &str = "__selectedBranch";

/// Core trait that all node executors implement
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Unique type identifier (e.g., "http.request", "flow.condition")
    fn node_type(&self) -> &str;

    /// Run the node against a snapshot of the workflow context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutcome, NodeError>;

    /// Optional: Validate configuration at workflow load time
    fn validate_config(&self, _config: &HashMap<String, Value>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: description and ports for listings
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// What a node asks the scheduler to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// Commit the context and follow every outgoing edge.
    Continue(Context),
    /// Commit the context, checkpoint and hand control back until resumed.
    Pause(Context),
    /// Commit the context and follow only edges leaving through `output`.
    Branch { output: String, context: Context },
}

impl NodeOutcome {
    /// Interpret a raw context map carrying the reserved control keys.
    ///
    /// `__pause` wins over `__selectedBranch`; both keys are stripped.
    pub fn from_context(mut context: Context) -> Self {
        let pause = context
            .remove(PAUSE_KEY)
            .map(|v| v.is_truthy())
            .unwrap_or(false);
        let branch = context
            .remove(SELECTED_BRANCH_KEY)
            .and_then(|v| v.as_str().map(str::to_owned));

        match (pause, branch) {
            (true, _) => NodeOutcome::Pause(context),
            (false, Some(output)) => NodeOutcome::Branch { output, context },
            (false, None) => NodeOutcome::Continue(context),
        }
    }

    pub fn context(&self) -> &Context {
        match self {
            NodeOutcome::Continue(context)
            | NodeOutcome::Pause(context)
            | NodeOutcome::Branch { context, .. } => context,
        }
    }

    pub fn into_context(self) -> Context {
        match self {
            NodeOutcome::Continue(context)
            | NodeOutcome::Pause(context)
            | NodeOutcome::Branch { context, .. } => context,
        }
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    pub node_name: String,
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub user_id: String,

    /// Static configuration for this node
    pub config: HashMap<String, Value>,

    /// Copy of the workflow context as of dispatch
    pub context: Context,

    /// Shared service handles
    pub tools: ToolHandles,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Fired when the run is cancelled or times out
    pub cancellation: CancellationToken,
}

impl NodeContext {
    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get a string config value or return error
    pub fn require_config_str(&self, name: &str) -> Result<&str, NodeError> {
        self.require_config(name)?
            .as_str()
            .ok_or_else(|| NodeError::Configuration(format!("Config '{}' must be a string", name)))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }

    /// Get a context value or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.context
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Continue with the context unchanged.
    pub fn pass_through(&self) -> NodeOutcome {
        NodeOutcome::Continue(self.context.clone())
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub outputs: Vec<PortDefinition>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}
