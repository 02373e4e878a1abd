use crate::config::RuntimeConfig;
use crate::executor::{ExecutionScope, WorkflowExecutor};
use crate::graph::ExecutionGraph;
use crate::registry::NodeRegistry;
use crate::state::ExecutionState;
use crate::store::{ExecutionStore, MemoryStore};
use flowcore::{
    Context, CyclePolicy, EventBus, ExecutionEvent, ExecutionHeader, ExecutionId, ExecutionRecord,
    ExecutionStatus, FlowError, ToolHandles, Workflow, WorkflowError, WorkflowId,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

/// Outcome of one `run`/`resume` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub success: bool,
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub output: Context,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retryable: bool,
}

type ActiveSet = Mutex<HashMap<ExecutionId, CancellationToken>>;

/// Main runtime for executing workflows
pub struct FlowRuntime {
    config: Arc<RuntimeConfig>,
    registry: Arc<NodeRegistry>,
    executor: WorkflowExecutor,
    event_bus: Arc<EventBus>,
    store: Arc<dyn ExecutionStore>,
    tools: ToolHandles,
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
    active: ActiveSet,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry, backed by memory
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let config = Arc::new(config);
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            executor: WorkflowExecutor::new(config.clone()),
            config,
            registry,
            event_bus,
            store: Arc::new(MemoryStore::new()),
            tools: ToolHandles::new(),
            workflows: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Persist executions somewhere other than process memory
    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = store;
        self
    }

    /// Handles passed through to every node
    pub fn with_tools(mut self, tools: ToolHandles) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Get access to the node registry
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Register a workflow so it can be started and resumed by id
    pub async fn register_workflow(&self, workflow: Workflow) -> Result<(), FlowError> {
        workflow.validate()?;
        tracing::info!(workflow_id = %workflow.id, name = %workflow.name, "Registering workflow");
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    pub async fn workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    /// Forget a definition. Stored executions of it can still be resumed via
    /// [`FlowRuntime::resume_with`].
    pub async fn remove_workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.write().await.remove(workflow_id)
    }

    pub async fn list_workflows(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        workflows
    }

    /// Start a fresh execution of `workflow`.
    pub async fn run(
        &self,
        workflow: &Workflow,
        user_id: &str,
        initial_context: Context,
    ) -> Result<RunResult, FlowError> {
        workflow.validate()?;
        let graph = ExecutionGraph::build(workflow);
        if self.config.cycle_policy_for(workflow) == CyclePolicy::Reject {
            graph.ensure_acyclic()?;
        }
        let total_steps = graph.executable_count(|t| self.config.is_trigger(t)) as u32;

        let mut state = ExecutionState::create(
            self.store.clone(),
            workflow.id.clone(),
            user_id,
            initial_context,
            total_steps,
        )
        .await?;

        let token = self.activate(state.execution_id())?;
        Ok(self.drive(workflow, &mut state, token.token()).await)
    }

    /// Start a fresh execution of a registered workflow
    pub async fn run_workflow(
        &self,
        workflow_id: &str,
        user_id: &str,
        initial_context: Context,
    ) -> Result<RunResult, FlowError> {
        let workflow = self
            .workflow(workflow_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;
        self.run(&workflow, user_id, initial_context).await
    }

    /// Continue a paused or failed execution of a registered workflow.
    pub async fn resume(&self, execution_id: ExecutionId) -> Result<RunResult, FlowError> {
        self.resume_inner(None, execution_id, None).await
    }

    /// Continue an execution, merging `input` into its context first.
    ///
    /// This is how an external event answers a pausing node.
    pub async fn resume_with_input(
        &self,
        execution_id: ExecutionId,
        input: Context,
    ) -> Result<RunResult, FlowError> {
        self.resume_inner(None, execution_id, Some(input)).await
    }

    /// Continue an execution against a definition the runtime never registered.
    pub async fn resume_with(
        &self,
        workflow: &Workflow,
        execution_id: ExecutionId,
        input: Option<Context>,
    ) -> Result<RunResult, FlowError> {
        self.resume_inner(Some(workflow), execution_id, input).await
    }

    async fn resume_inner(
        &self,
        workflow: Option<&Workflow>,
        execution_id: ExecutionId,
        input: Option<Context>,
    ) -> Result<RunResult, FlowError> {
        let token = self.activate(execution_id)?;

        let mut state = ExecutionState::resume(self.store.clone(), execution_id).await?;
        if !state.can_resume() {
            return Err(FlowError::NotResumable {
                execution_id,
                status: state.status(),
            });
        }

        let registered;
        let workflow = match workflow {
            Some(workflow) => workflow,
            None => {
                registered = self
                    .workflow(state.workflow_id())
                    .await
                    .ok_or_else(|| WorkflowError::NotFound(state.workflow_id().to_string()))?;
                &registered
            }
        };
        if workflow.id != state.workflow_id() {
            return Err(WorkflowError::Invalid(format!(
                "execution {} belongs to workflow {}, not {}",
                execution_id,
                state.workflow_id(),
                workflow.id
            ))
            .into());
        }
        workflow.validate()?;
        if self.config.cycle_policy_for(workflow) == CyclePolicy::Reject {
            ExecutionGraph::build(workflow).ensure_acyclic()?;
        }

        if let Some(input) = input {
            tracing::debug!(execution_id = %execution_id, keys = input.len(), "Merging resume input");
            state.update_context(input);
        }

        Ok(self.drive(workflow, &mut state, token.token()).await)
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        state: &mut ExecutionState,
        cancellation: &CancellationToken,
    ) -> RunResult {
        let scope = ExecutionScope {
            workflow,
            registry: &self.registry,
            event_bus: &self.event_bus,
            tools: &self.tools,
            cancellation,
        };

        let result = self.executor.execute(&scope, state).await;
        let status = state.status();

        match result {
            Ok(status) => RunResult {
                success: status != ExecutionStatus::Failed,
                execution_id: state.execution_id(),
                status,
                output: state.context().clone(),
                error: None,
                retryable: false,
            },
            Err(e) => RunResult {
                success: false,
                execution_id: state.execution_id(),
                status,
                output: state.context().clone(),
                error: Some(e.to_string()),
                retryable: e.is_retryable(),
            },
        }
    }

    /// Read-only view of a persisted execution
    pub async fn get_state(&self, execution_id: ExecutionId) -> Result<ExecutionRecord, FlowError> {
        self.store
            .load(execution_id)
            .await?
            .ok_or(FlowError::ExecutionNotFound(execution_id))
    }

    pub async fn list_executions(
        &self,
        workflow_id: Option<&str>,
    ) -> Result<Vec<ExecutionHeader>, FlowError> {
        Ok(self.store.list(workflow_id).await?)
    }

    /// Cancel an execution running in this process.
    ///
    /// Returns `false` when the execution is not active here.
    pub fn cancel(&self, execution_id: ExecutionId) -> bool {
        match lock(&self.active).get(&execution_id) {
            Some(token) => {
                tracing::info!(execution_id = %execution_id, "Cancelling execution");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, execution_id: ExecutionId) -> bool {
        lock(&self.active).contains_key(&execution_id)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    fn activate(&self, execution_id: ExecutionId) -> Result<ActiveGuard<'_>, FlowError> {
        let mut active = lock(&self.active);
        if active.contains_key(&execution_id) {
            return Err(FlowError::ExecutionBusy(execution_id));
        }
        let token = CancellationToken::new();
        active.insert(execution_id, token.clone());
        Ok(ActiveGuard {
            active: &self.active,
            execution_id,
            token,
        })
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(active: &ActiveSet) -> MutexGuard<'_, HashMap<ExecutionId, CancellationToken>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Membership in the active set, released on drop.
struct ActiveGuard<'a> {
    active: &'a ActiveSet,
    execution_id: ExecutionId,
    token: CancellationToken,
}

impl ActiveGuard<'_> {
    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        lock(self.active).remove(&self.execution_id);
    }
}
