use crate::config::RuntimeConfig;
use crate::graph::ExecutionGraph;
use crate::registry::NodeRegistry;
use crate::state::ExecutionState;
use chrono::Utc;
use flowcore::{
    EventBus, ExecutionError, ExecutionEvent, ExecutionStatus, FlowError, NodeContext, NodeError,
    NodeId, NodeOutcome, NodeSpec, StoreError, ToolHandles, Workflow, WorkflowError,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Collaborators a run needs besides its state.
pub struct ExecutionScope<'a> {
    pub workflow: &'a Workflow,
    pub registry: &'a NodeRegistry,
    pub event_bus: &'a EventBus,
    pub tools: &'a ToolHandles,
    pub cancellation: &'a CancellationToken,
}

/// Sequential graph interpreter.
///
/// Walks the workflow one node at a time in FIFO order, committing each
/// result into [`ExecutionState`] before deciding what runs next.
pub struct WorkflowExecutor {
    config: Arc<RuntimeConfig>,
}

enum Interrupt {
    Finished(Result<ExecutionStatus, FlowError>),
    TimedOut(Duration),
    Cancelled,
}

impl WorkflowExecutor {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Drive `state` until the graph is exhausted, a node pauses or fails,
    /// the deadline passes or the run is cancelled.
    ///
    /// A fresh (`Pending`) state starts at the entry nodes; a `Paused` or
    /// `Failed` one continues from its last checkpoint.
    pub async fn execute(
        &self,
        scope: &ExecutionScope<'_>,
        state: &mut ExecutionState,
    ) -> Result<ExecutionStatus, FlowError> {
        let execution_id = state.execution_id();
        let resumed = state.status() != ExecutionStatus::Pending;
        let deadline = self.config.timeout_for(scope.workflow);
        let start_time = Instant::now();

        scope.event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_id: scope.workflow.id.clone(),
            resumed,
            timestamp: Utc::now(),
        });
        tracing::info!(
            execution_id = %execution_id,
            workflow_id = %scope.workflow.id,
            resumed,
            "Starting workflow execution"
        );

        let interrupt = {
            let run = self.run_graph(scope, state);
            tokio::select! {
                biased;
                _ = scope.cancellation.cancelled() => Interrupt::Cancelled,
                _ = tokio::time::sleep(deadline) => Interrupt::TimedOut(deadline),
                result = run => Interrupt::Finished(result),
            }
        };

        let result = match interrupt {
            Interrupt::Finished(result) => {
                if let Err(e) = &result {
                    self.record_abort(state, e).await;
                }
                result
            }
            Interrupt::TimedOut(limit) => {
                scope.cancellation.cancel();
                let error = FlowError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                };
                tracing::warn!(execution_id = %execution_id, timeout_ms = limit.as_millis() as u64, "Workflow timed out");
                self.interrupted(state, &error).await;
                Err(error)
            }
            Interrupt::Cancelled => {
                let error = FlowError::Cancelled(execution_id);
                tracing::warn!(execution_id = %execution_id, "Workflow cancelled");
                self.interrupted(state, &error).await;
                Err(error)
            }
        };

        let duration_ms = start_time.elapsed().as_millis() as u64;
        scope.event_bus.emit(ExecutionEvent::WorkflowFinished {
            execution_id,
            status: state.status(),
            duration_ms,
            error: result.as_ref().err().map(|e| e.to_string()),
            timestamp: Utc::now(),
        });
        tracing::info!(
            execution_id = %execution_id,
            status = %state.status(),
            duration_ms,
            "Workflow execution finished"
        );

        result
    }

    /// The run future was dropped, possibly mid-commit. Catch up with
    /// whatever reached the store before persisting `Failed`.
    async fn interrupted(&self, state: &mut ExecutionState, error: &FlowError) {
        state.discard_uncommitted();
        match state.reconcile().await {
            Ok(true) => tracing::debug!(
                execution_id = %state.execution_id(),
                step = state.current_step(),
                "Adopted commit that landed after interruption"
            ),
            Ok(false) => {}
            Err(e) => tracing::error!(
                execution_id = %state.execution_id(),
                error = %e,
                "Failed to reload interrupted execution"
            ),
        }
        self.record_abort(state, error).await;
    }

    /// Persist `Failed` for an aborted run unless the failure already did.
    async fn record_abort(&self, state: &mut ExecutionState, error: &FlowError) {
        match error {
            // Error checkpoint already written.
            FlowError::Execution(_) => {}
            // Another writer owns the record now.
            FlowError::Store(StoreError::Conflict { .. }) => {}
            _ => {
                if let Err(persist_err) = state.mark_failed(error.to_string()).await {
                    tracing::error!(
                        execution_id = %state.execution_id(),
                        error = %persist_err,
                        "Failed to persist aborted execution"
                    );
                }
            }
        }
    }

    async fn run_graph(
        &self,
        scope: &ExecutionScope<'_>,
        state: &mut ExecutionState,
    ) -> Result<ExecutionStatus, FlowError> {
        let graph = ExecutionGraph::build(scope.workflow);
        let (mut queue, mut dispatched) = self.seed(&graph, state);

        state.set_status(ExecutionStatus::Running)?;
        state.save().await?;

        while let Some(node_id) = queue.pop_front() {
            if dispatched.contains(&node_id) {
                tracing::trace!(node_id = %node_id, "Skipping already dispatched node");
                continue;
            }

            let Some(node) = graph.node(&node_id) else {
                // Unknown ids have no outgoing edges to carry forward.
                let pending = queue.iter().cloned().collect();
                return self
                    .fail_node(
                        scope,
                        state,
                        &node_id,
                        &node_id,
                        pending,
                        format!("Node {} not found in workflow", node_id),
                        false,
                    )
                    .await;
            };

            if self.config.is_trigger(&node.node_type) {
                continue;
            }

            let pending: Vec<NodeId> = queue.iter().cloned().collect();

            let Some(executor) = scope.registry.get(&node.node_type) else {
                let continuation = failure_continuation(&graph, node, &pending);
                return self
                    .fail_node(
                        scope,
                        state,
                        &node.id,
                        node.display_name(),
                        continuation,
                        WorkflowError::UnknownNodeType(node.node_type.clone()).to_string(),
                        false,
                    )
                    .await;
            };

            let ctx = NodeContext {
                node_id: node.id.clone(),
                node_name: node.display_name().to_string(),
                execution_id: state.execution_id(),
                workflow_id: scope.workflow.id.clone(),
                user_id: state.user_id().to_string(),
                config: node.config.clone(),
                context: state.context().clone(),
                tools: scope.tools.clone(),
                events: scope
                    .event_bus
                    .create_emitter(state.execution_id(), node.id.clone()),
                cancellation: scope.cancellation.child_token(),
            };

            scope.event_bus.emit(ExecutionEvent::NodeStarted {
                execution_id: state.execution_id(),
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                timestamp: Utc::now(),
            });
            tracing::debug!(
                execution_id = %state.execution_id(),
                node_id = %node.id,
                node_type = %node.node_type,
                "Dispatching node"
            );

            let started = Instant::now();
            let result = match self.config.node_timeout_for(node) {
                Some(limit) => match tokio::time::timeout(limit, executor.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::Timeout {
                        millis: limit.as_millis() as u64,
                    }),
                },
                None => executor.execute(ctx).await,
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    let retryable = e.is_retryable();
                    let continuation = failure_continuation(&graph, node, &pending);
                    return self
                        .fail_node(
                            scope,
                            state,
                            &node.id,
                            node.display_name(),
                            continuation,
                            e.to_string(),
                            retryable,
                        )
                        .await;
                }
            };

            dispatched.insert(node.id.clone());

            let (context, selection, pause) = match outcome {
                NodeOutcome::Continue(context) => (context, None, false),
                NodeOutcome::Pause(context) => (context, None, true),
                NodeOutcome::Branch { output, context } => (context, Some(output), false),
            };
            state.set_context(context);
            state.increment_step();

            let successors = self.successors(&graph, node, selection.as_deref());
            let mut continuation = pending;
            continuation.extend(successors.iter().cloned());

            if pause {
                state.set_status(ExecutionStatus::Paused)?;
                state
                    .create_checkpoint(&node.id, node.display_name(), continuation)
                    .await?;

                scope.event_bus.emit(ExecutionEvent::NodePaused {
                    execution_id: state.execution_id(),
                    node_id: node.id.clone(),
                    step: state.current_step(),
                    timestamp: Utc::now(),
                });
                tracing::info!(
                    execution_id = %state.execution_id(),
                    node_id = %node.id,
                    step = state.current_step(),
                    "Node requested pause"
                );
                return Ok(ExecutionStatus::Paused);
            }

            state
                .create_checkpoint(&node.id, node.display_name(), continuation)
                .await?;
            queue.extend(successors);

            scope.event_bus.emit(ExecutionEvent::NodeCompleted {
                execution_id: state.execution_id(),
                node_id: node.id.clone(),
                step: state.current_step(),
                duration_ms,
                timestamp: Utc::now(),
            });
            tracing::info!(
                execution_id = %state.execution_id(),
                node_id = %node.id,
                step = state.current_step(),
                "Node {} completed in {}ms",
                node.id,
                duration_ms
            );
        }

        state.mark_completed().await?;
        Ok(ExecutionStatus::Completed)
    }

    /// Initial work queue and dispatched set for this run.
    fn seed(
        &self,
        graph: &ExecutionGraph<'_>,
        state: &ExecutionState,
    ) -> (VecDeque<NodeId>, HashSet<NodeId>) {
        let dispatched: HashSet<NodeId> = state.checkpointed_nodes().map(str::to_string).collect();

        let queue: VecDeque<NodeId> = match state.resume_point() {
            Some(point) if state.status() != ExecutionStatus::Pending => {
                tracing::info!(
                    execution_id = %state.execution_id(),
                    node_id = %point.node_id,
                    step = point.step_number,
                    failed = point.failed,
                    "Resuming from checkpoint"
                );
                point.pending.into()
            }
            _ => graph
                .entry_nodes(|node_type| self.config.is_trigger(node_type))
                .into(),
        };

        (queue, dispatched)
    }

    /// Nodes to enqueue after `node` finished with an optional branch tag.
    fn successors(
        &self,
        graph: &ExecutionGraph<'_>,
        node: &NodeSpec,
        selection: Option<&str>,
    ) -> Vec<NodeId> {
        match (graph.is_branch(&node.id), selection) {
            (true, Some(output)) => {
                let next = graph.successors(&node.id, Some(output));
                if next.is_empty() {
                    tracing::debug!(node_id = %node.id, output, "Selected branch has no edges");
                }
                next
            }
            (true, None) => {
                tracing::warn!(
                    node_id = %node.id,
                    "Branch node returned no selection; following every output"
                );
                graph.successors(&node.id, None)
            }
            (false, Some(output)) => {
                tracing::debug!(node_id = %node.id, output, "Ignoring branch selection on non-branch node");
                graph.successors(&node.id, None)
            }
            (false, None) => graph.successors(&node.id, None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail_node(
        &self,
        scope: &ExecutionScope<'_>,
        state: &mut ExecutionState,
        node_id: &str,
        node_name: &str,
        pending: Vec<NodeId>,
        message: String,
        retryable: bool,
    ) -> Result<ExecutionStatus, FlowError> {
        tracing::error!(
            execution_id = %state.execution_id(),
            node_id,
            retryable,
            "Node {} failed: {}",
            node_id,
            message
        );

        state
            .create_error_checkpoint(node_id, node_name, pending, message.clone())
            .await?;

        scope.event_bus.emit(ExecutionEvent::NodeFailed {
            execution_id: state.execution_id(),
            node_id: node_id.to_string(),
            error: message.clone(),
            timestamp: Utc::now(),
        });

        Err(ExecutionError {
            workflow_id: scope.workflow.id.clone(),
            node_id: node_id.to_string(),
            message,
            retryable,
        }
        .into())
    }
}

/// Continuation stored with an error checkpoint: the remaining queue followed
/// by every successor of the failed node. A resume starts downstream of it.
fn failure_continuation(
    graph: &ExecutionGraph<'_>,
    node: &NodeSpec,
    pending: &[NodeId],
) -> Vec<NodeId> {
    let mut continuation = pending.to_vec();
    continuation.extend(graph.successors(&node.id, None));
    continuation
}
