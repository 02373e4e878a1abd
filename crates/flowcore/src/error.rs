use crate::{ExecutionId, ExecutionStatus, NodeId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Workflow timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Execution {0} was cancelled")]
    Cancelled(ExecutionId),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Execution {0} is already running")]
    ExecutionBusy(ExecutionId),

    #[error("Execution {execution_id} cannot be resumed from status {status}")]
    NotResumable {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Whether the caller may reasonably retry the whole call.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::Execution(e) => e.retryable,
            FlowError::Timeout { .. } => true,
            FlowError::Node(e) => e.is_retryable(),
            FlowError::Store(StoreError::Conflict { .. }) => true,
            FlowError::ExecutionBusy(_) => true,
            _ => false,
        }
    }
}

/// A node-level failure, always preceded by an error checkpoint.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Workflow {workflow_id} failed at node {node_id}: {message}")]
pub struct ExecutionError {
    pub workflow_id: String,
    pub node_id: NodeId,
    pub message: String,
    pub retryable: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Transient(_) | NodeError::Timeout { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Cyclic dependency detected between nodes: {}", nodes.join(", "))]
    CyclicDependency { nodes: Vec<NodeId> },

    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("No executor registered for node type '{0}'")]
    UnknownNodeType(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Execution {0} already exists")]
    AlreadyExists(ExecutionId),

    #[error("Execution {0} not found in store")]
    NotFound(ExecutionId),

    #[error("Stale write for execution {execution_id}: expected version {expected}, found {found}")]
    Conflict {
        execution_id: ExecutionId,
        expected: u64,
        found: u64,
    },

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),
}
