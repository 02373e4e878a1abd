use flowcore::{CyclePolicy, NodeSpec, Workflow};
use std::collections::HashSet;
use std::time::Duration;

/// Default whole-run deadline (`WORKFLOW_TIMEOUT_MS`).
pub const DEFAULT_WORKFLOW_TIMEOUT_MS: u64 = 30_000;

/// Node types that mark entry points and are never dispatched.
pub const DEFAULT_TRIGGER_TYPES: [&str; 4] = [
    "trigger.manual",
    "trigger.schedule",
    "trigger.webhook",
    "trigger.initial",
];

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Deadline for one `run()`/`resume()` call.
    pub workflow_timeout: Duration,
    /// Deadline for a single node; `None` leaves nodes unbounded.
    pub node_timeout: Option<Duration>,
    pub cycle_policy: CyclePolicy,
    pub trigger_types: HashSet<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            workflow_timeout: Duration::from_millis(DEFAULT_WORKFLOW_TIMEOUT_MS),
            node_timeout: None,
            cycle_policy: CyclePolicy::Allow,
            trigger_types: DEFAULT_TRIGGER_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `WORKFLOW_TIMEOUT_MS`, `FLOW_NODE_TIMEOUT_MS`,
    /// `FLOW_CYCLE_POLICY`, `FLOW_EVENT_BUFFER` and `FLOW_TRIGGER_TYPES`
    /// (comma separated). Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("WORKFLOW_TIMEOUT_MS") {
            config.workflow_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("FLOW_NODE_TIMEOUT_MS") {
            config.node_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(policy) = env_parse::<CyclePolicy>("FLOW_CYCLE_POLICY") {
            config.cycle_policy = policy;
        }
        if let Some(size) = env_parse::<usize>("FLOW_EVENT_BUFFER") {
            config.event_buffer_size = size.max(1);
        }
        if let Ok(types) = std::env::var("FLOW_TRIGGER_TYPES") {
            config.trigger_types = types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        config
    }

    pub fn with_workflow_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_timeout = timeout;
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    pub fn is_trigger(&self, node_type: &str) -> bool {
        self.trigger_types.contains(node_type)
    }

    /// Run deadline after applying the workflow's own override.
    pub fn timeout_for(&self, workflow: &Workflow) -> Duration {
        workflow
            .settings
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.workflow_timeout)
    }

    pub fn cycle_policy_for(&self, workflow: &Workflow) -> CyclePolicy {
        workflow.settings.cycle_policy.unwrap_or(self.cycle_policy)
    }

    pub fn node_timeout_for(&self, node: &NodeSpec) -> Option<Duration> {
        node.timeout_ms.map(Duration::from_millis).or(self.node_timeout)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
