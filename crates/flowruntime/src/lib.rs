//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflows: the sequential graph
//! scheduler, the per-execution state manager with its checkpoint log, the
//! stores that persist it, and the node registry.

mod config;
mod executor;
pub mod graph;
mod registry;
mod runtime;
mod state;
pub mod store;

pub use config::{RuntimeConfig, DEFAULT_TRIGGER_TYPES, DEFAULT_WORKFLOW_TIMEOUT_MS};
pub use executor::{ExecutionScope, WorkflowExecutor};
pub use graph::ExecutionGraph;
pub use registry::{FnNode, NodeRegistry};
pub use runtime::{FlowRuntime, RunResult};
pub use state::ExecutionState;
pub use store::{ExecutionStore, FileStore, MemoryStore};
