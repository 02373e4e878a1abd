use crate::{Value, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub type WorkflowId = String;
pub type NodeId = String;

/// Output/input name used when a connection does not name one.
pub const DEFAULT_PORT: &str = "default";

/// Complete workflow definition, as supplied by the definition store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "generate_id")]
    pub id: WorkflowId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

fn generate_id() -> WorkflowId {
    Uuid::new_v4().to_string()
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<WorkflowId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Connect two nodes through named ports.
    pub fn connect(
        &mut self,
        from_node: impl Into<NodeId>,
        from_output: impl Into<String>,
        to_node: impl Into<NodeId>,
        to_input: impl Into<String>,
    ) {
        self.connections.push(Connection {
            from_node_id: from_node.into(),
            to_node_id: to_node.into(),
            from_output: from_output.into(),
            to_input: to_input.into(),
        });
    }

    /// Connect two nodes through their default ports.
    pub fn link(&mut self, from_node: impl Into<NodeId>, to_node: impl Into<NodeId>) {
        self.connect(from_node, DEFAULT_PORT, to_node, DEFAULT_PORT);
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Structural checks: unique node ids and no dangling connections.
    ///
    /// Cycles are not checked here; that is a runtime policy decision.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.nodes.is_empty() {
            return Err(WorkflowError::Invalid("workflow has no nodes".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(WorkflowError::Invalid("node with empty id".to_string()));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(WorkflowError::DuplicateNode(node.id.clone()));
            }
        }

        for conn in &self.connections {
            for end in [&conn.from_node_id, &conn.to_node_id] {
                if !seen.contains(end.as_str()) {
                    return Err(WorkflowError::InvalidConnection(format!(
                        "{} -> {} references unknown node {}",
                        conn.from_node_id, conn.to_node_id, end
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Opaque configuration handed to the executor.
    #[serde(default, rename = "data", alias = "config")]
    pub config: HashMap<String, Value>,
    /// Per-node deadline, overriding the runtime default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            config: HashMap::new(),
            timeout_ms: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Connection between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    #[serde(default = "default_port")]
    pub from_output: String,
    #[serde(default = "default_port")]
    pub to_input: String,
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

/// Per-workflow overrides of runtime settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub cycle_policy: Option<CyclePolicy>,
}

/// What to do with a definition whose graph contains a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePolicy {
    /// Run it; the dispatched-node guard executes every node at most once.
    #[default]
    Allow,
    /// Refuse to start with `WorkflowError::CyclicDependency`.
    Reject,
}

impl std::str::FromStr for CyclePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(CyclePolicy::Allow),
            "reject" => Ok(CyclePolicy::Reject),
            other => Err(format!("unknown cycle policy: {other}")),
        }
    }
}
