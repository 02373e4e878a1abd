//! Durable state of one execution.
//!
//! `ExecutionState` owns the checkpoint history and is the only place status
//! transitions happen. Context and counters change in memory; every
//! checkpoint and terminal transition is persisted with a single store
//! commit guarded by the header version. Commits run on their own task, so a
//! caller dropped mid-write never leaves half a commit behind; `reconcile`
//! waits for such a commit and adopts it.

use crate::store::ExecutionStore;
use chrono::Utc;
use flowcore::{
    Checkpoint, Context, ExecutionHeader, ExecutionId, ExecutionRecord, ExecutionStatus,
    FlowError, NodeId, ResumePoint, WorkflowId,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct ExecutionState {
    store: Arc<dyn ExecutionStore>,
    header: ExecutionHeader,
    checkpoints: Vec<Checkpoint>,
    /// Context and step as of the last durable write.
    durable_context: Context,
    durable_step: u32,
    /// Held by the task performing a commit.
    commit_gate: Arc<Mutex<()>>,
}

impl ExecutionState {
    /// Allocate and persist a fresh `Pending` execution.
    pub async fn create(
        store: Arc<dyn ExecutionStore>,
        workflow_id: impl Into<WorkflowId>,
        user_id: impl Into<String>,
        initial_context: Context,
        total_steps: u32,
    ) -> Result<Self, FlowError> {
        let now = Utc::now();
        let header = ExecutionHeader {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            user_id: user_id.into(),
            status: ExecutionStatus::Pending,
            context: initial_context,
            current_step: 0,
            total_steps,
            error: None,
            version: 0,
            checkpoint_count: 0,
            created_at: now,
            updated_at: now,
        };
        store.insert(&header).await?;

        tracing::debug!(
            execution_id = %header.id,
            workflow_id = %header.workflow_id,
            total_steps,
            "created execution"
        );

        Ok(Self {
            store,
            durable_context: header.context.clone(),
            durable_step: 0,
            header,
            checkpoints: Vec::new(),
            commit_gate: Arc::new(Mutex::new(())),
        })
    }

    /// Load the latest persisted snapshot of an execution.
    pub async fn resume(
        store: Arc<dyn ExecutionStore>,
        execution_id: ExecutionId,
    ) -> Result<Self, FlowError> {
        let record = store
            .load(execution_id)
            .await?
            .ok_or(FlowError::ExecutionNotFound(execution_id))?;
        let ExecutionRecord {
            header,
            checkpoints,
        } = record;

        tracing::debug!(
            execution_id = %header.id,
            status = %header.status,
            checkpoints = checkpoints.len(),
            "loaded execution"
        );

        Ok(Self {
            store,
            durable_context: header.context.clone(),
            durable_step: header.current_step,
            header,
            checkpoints,
            commit_gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.header.id
    }

    pub fn workflow_id(&self) -> &str {
        &self.header.workflow_id
    }

    pub fn user_id(&self) -> &str {
        &self.header.user_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.header.status
    }

    pub fn context(&self) -> &Context {
        &self.header.context
    }

    pub fn current_step(&self) -> u32 {
        self.header.current_step
    }

    pub fn total_steps(&self) -> u32 {
        self.header.total_steps
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn error(&self) -> Option<&str> {
        self.header.error.as_deref()
    }

    /// Owned copy of the record as it stands in memory.
    pub fn snapshot(&self) -> ExecutionRecord {
        ExecutionRecord {
            header: self.header.clone(),
            checkpoints: self.checkpoints.clone(),
        }
    }

    /// Merge `partial` into the live context.
    pub fn update_context(&mut self, partial: Context) {
        self.header.context.extend(partial);
    }

    /// Replace the live context.
    pub fn set_context(&mut self, context: Context) {
        self.header.context = context;
    }

    pub fn increment_step(&mut self) {
        self.header.current_step += 1;
    }

    /// In-memory status change; rejected unless the lifecycle allows it.
    pub fn set_status(&mut self, status: ExecutionStatus) -> Result<(), FlowError> {
        let from = self.header.status;
        if !from.can_transition_to(status) {
            return Err(FlowError::InvalidTransition { from, to: status });
        }
        self.header.status = status;
        Ok(())
    }

    /// Record a successful node and persist everything in one commit.
    pub async fn create_checkpoint(
        &mut self,
        node_id: impl Into<NodeId>,
        node_name: impl Into<String>,
        pending: Vec<NodeId>,
    ) -> Result<(), FlowError> {
        let checkpoint = self.new_checkpoint(node_id.into(), node_name.into(), pending, None);
        self.persist(Some(checkpoint)).await
    }

    /// Record a failed node, force `Failed` and persist in one commit.
    pub async fn create_error_checkpoint(
        &mut self,
        node_id: impl Into<NodeId>,
        node_name: impl Into<String>,
        pending: Vec<NodeId>,
        error: impl Into<String>,
    ) -> Result<(), FlowError> {
        let error = error.into();
        let checkpoint =
            self.new_checkpoint(node_id.into(), node_name.into(), pending, Some(error.clone()));
        self.set_status(ExecutionStatus::Failed)?;
        self.header.error = Some(error);
        self.persist(Some(checkpoint)).await
    }

    /// Persist the `Completed` status and the final context.
    pub async fn mark_completed(&mut self) -> Result<(), FlowError> {
        self.set_status(ExecutionStatus::Completed)?;
        self.header.error = None;
        self.persist(None).await
    }

    /// Persist the `Failed` status with its reason.
    pub async fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), FlowError> {
        self.set_status(ExecutionStatus::Failed)?;
        self.header.error = Some(error.into());
        self.persist(None).await
    }

    /// Persist the current status and context without a checkpoint.
    pub async fn save(&mut self) -> Result<(), FlowError> {
        self.persist(None).await
    }

    pub fn can_resume(&self) -> bool {
        match self.header.status {
            ExecutionStatus::Paused => true,
            ExecutionStatus::Failed => !self.checkpoints.is_empty(),
            _ => false,
        }
    }

    pub fn resume_point(&self) -> Option<ResumePoint> {
        self.checkpoints.last().map(|cp| ResumePoint {
            node_id: cp.node_id.clone(),
            step_number: cp.step_number,
            failed: cp.is_error(),
            pending: cp.pending.clone(),
        })
    }

    /// Nodes that already have a checkpoint, failed ones included, in
    /// checkpoint order. None of them is dispatched again.
    pub fn checkpointed_nodes(&self) -> impl Iterator<Item = &str> {
        self.checkpoints.iter().map(|cp| cp.node_id.as_str())
    }

    /// Wait for any commit still in flight, then adopt the stored header and
    /// checkpoints if they are ahead of memory.
    ///
    /// Returns whether anything was adopted.
    pub async fn reconcile(&mut self) -> Result<bool, FlowError> {
        let gate = self.commit_gate.clone();
        let _idle = gate.lock().await;

        let id = self.header.id;
        let stored = self
            .store
            .load_header(id)
            .await?
            .ok_or(FlowError::ExecutionNotFound(id))?;
        if stored.version <= self.header.version {
            return Ok(false);
        }

        let mut appended = self
            .store
            .load_checkpoints(id, self.header.checkpoint_count)
            .await?;
        appended.truncate(stored.checkpoint_count.saturating_sub(self.header.checkpoint_count) as usize);

        tracing::warn!(
            execution_id = %id,
            version = stored.version,
            adopted_checkpoints = appended.len(),
            "store is ahead of memory; adopting stored state"
        );

        self.checkpoints.extend(appended);
        self.durable_context = stored.context.clone();
        self.durable_step = stored.current_step;
        self.header = stored;
        Ok(true)
    }

    /// Drop context and step changes that never reached the store.
    pub fn discard_uncommitted(&mut self) {
        self.header.context = self.durable_context.clone();
        self.header.current_step = self.durable_step;
    }

    fn new_checkpoint(
        &self,
        node_id: NodeId,
        node_name: String,
        pending: Vec<NodeId>,
        error: Option<String>,
    ) -> Checkpoint {
        Checkpoint {
            id: Uuid::new_v4(),
            sequence: self.header.checkpoint_count,
            node_id,
            node_name,
            step_number: self.header.current_step,
            context: self.header.context.clone(),
            pending,
            timestamp: Utc::now(),
            error,
        }
    }

    async fn persist(&mut self, checkpoint: Option<Checkpoint>) -> Result<(), FlowError> {
        let expected_version = self.header.version;
        let mut next = self.header.clone();
        next.version = expected_version + 1;
        next.updated_at = Utc::now();
        if checkpoint.is_some() {
            next.checkpoint_count += 1;
        }

        let gate = self.commit_gate.clone().lock_owned().await;
        let store = self.store.clone();
        let header = next.clone();
        let appended: Vec<Checkpoint> = checkpoint.iter().cloned().collect();
        let commit = tokio::spawn(async move {
            let _gate = gate;
            store.commit(&header, &appended, expected_version).await
        });
        commit.await.map_err(std::io::Error::other)??;

        tracing::debug!(
            execution_id = %next.id,
            status = %next.status,
            step = next.current_step,
            version = next.version,
            checkpoint = checkpoint.as_ref().map(|cp| cp.node_id.as_str()),
            "persisted execution state"
        );

        self.durable_context = next.context.clone();
        self.durable_step = next.current_step;
        self.header = next;
        self.checkpoints.extend(checkpoint);
        Ok(())
    }
}
