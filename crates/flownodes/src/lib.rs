//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod debug;
mod flow;
mod http;
mod time;
mod transform;

pub use debug::DebugNode;
pub use flow::{ConditionNode, WaitNode};
pub use http::HttpRequestNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode, SetNode};

use flowruntime::NodeRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(DebugNode));
    registry.register(Arc::new(DelayNode));
    registry.register(Arc::new(SetNode));
    registry.register(Arc::new(JsonParseNode));
    registry.register(Arc::new(JsonStringifyNode));
    registry.register(Arc::new(ConditionNode));
    registry.register(Arc::new(WaitNode));
    registry.register(Arc::new(HttpRequestNode::new()));
}

/// A registry holding every standard node
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
