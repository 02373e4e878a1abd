//! Core abstractions for the flow engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: workflow definitions, the node executor contract,
//! persisted execution records and the error taxonomy.

mod error;
pub mod events;
mod execution;
mod node;
mod tools;
mod value;
mod workflow;

pub use error::{ExecutionError, FlowError, NodeError, StoreError, WorkflowError};
pub use events::*;
pub use execution::{
    Checkpoint, ExecutionHeader, ExecutionRecord, ExecutionStatus, ResumePoint,
};
pub use node::{
    NodeContext, NodeExecutor, NodeMetadata, NodeOutcome, PortDefinition, PAUSE_KEY,
    SELECTED_BRANCH_KEY,
};
pub use tools::ToolHandles;
pub use value::{context_from_json, Context, Value};
pub use workflow::{
    Connection, CyclePolicy, NodeId, NodeSpec, Workflow, WorkflowId, WorkflowSettings,
    DEFAULT_PORT,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
