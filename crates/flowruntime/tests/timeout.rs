mod common;

use async_trait::async_trait;
use common::*;
use flowcore::{
    Checkpoint, ExecutionEvent, ExecutionHeader, ExecutionId, ExecutionStatus, NodeSpec,
    StoreError, Value,
};
use flowruntime::{ExecutionStore, MemoryStore, RuntimeConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Commits to memory, but answers the first checkpoint commit only after a
/// long pause, well past the workflow deadline.
#[derive(Default)]
struct SlowAckStore {
    inner: MemoryStore,
    delayed: AtomicBool,
}

#[async_trait]
impl ExecutionStore for SlowAckStore {
    async fn insert(&self, header: &ExecutionHeader) -> Result<(), StoreError> {
        self.inner.insert(header).await
    }

    async fn commit(
        &self,
        header: &ExecutionHeader,
        appended: &[Checkpoint],
        expected_version: u64,
    ) -> Result<(), StoreError> {
        self.inner.commit(header, appended, expected_version).await?;
        if !appended.is_empty() && !self.delayed.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(())
    }

    async fn load_header(&self, id: ExecutionId) -> Result<Option<ExecutionHeader>, StoreError> {
        self.inner.load_header(id).await
    }

    async fn load_checkpoints(
        &self,
        id: ExecutionId,
        from_sequence: u64,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        self.inner.load_checkpoints(id, from_sequence).await
    }

    async fn list(&self, workflow_id: Option<&str>) -> Result<Vec<ExecutionHeader>, StoreError> {
        self.inner.list(workflow_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_never_resolving_node_times_out_without_checkpoint() {
    let runtime = runtime_with(short_timeout());
    let wf = workflow("stuck", &[("h", "test.hang")], &[]);

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert!(!result.success);
    assert!(result.retryable);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("timed out"));

    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(record.status(), ExecutionStatus::Failed);
    assert!(record.checkpoints.is_empty());
    assert!(record.header.error.as_deref().unwrap().contains("500ms"));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_discards_in_flight_node_only() {
    let runtime = runtime_with(short_timeout());
    let wf = workflow(
        "half-done",
        &[("a", "test.step"), ("h", "test.hang")],
        &[("a", "default", "h")],
    );

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert!(!result.success);
    assert_eq!(trail(&result.output), vec!["a"]);

    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(checkpoint_nodes(&record), vec!["a"]);
    assert_eq!(record.header.current_step, 1);
    assert_eq!(record.last_checkpoint().unwrap().pending, vec!["h".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_workflow_setting_overrides_global_deadline() {
    let runtime = runtime();
    let mut wf = workflow("stuck", &[("h", "test.hang")], &[]);
    wf.settings.timeout_ms = Some(50);

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert!(result.error.as_deref().unwrap().contains("50ms"));
}

#[tokio::test(start_paused = true)]
async fn test_node_deadline_is_a_retryable_node_failure() {
    let runtime = runtime();
    let mut wf = workflow("slow-node", &[("a", "test.step")], &[("a", "default", "h")]);
    wf.add_node(NodeSpec::new("h", "test.hang").with_timeout(100));

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert!(!result.success);
    assert!(result.retryable);
    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(checkpoint_nodes(&record), vec!["a", "h"]);
    let last = record.last_checkpoint().unwrap();
    assert!(last.error.as_deref().unwrap().contains("Timeout after 100ms"));
}

#[tokio::test(start_paused = true)]
async fn test_runtime_node_deadline_applies_to_every_node() {
    let runtime = runtime_with(RuntimeConfig::default().with_node_timeout(Duration::from_millis(20)));
    let wf = workflow("slow-node", &[("h", "test.hang")], &[]);

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(record.checkpoints.len(), 1);
    assert!(record.checkpoints[0].is_error());
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_run_resumes_from_last_checkpoint() {
    let runtime = runtime_with(short_timeout());
    let mut wf = workflow(
        "resume-after-timeout",
        &[("a", "test.step"), ("b", "test.step")],
        &[("a", "default", "h"), ("h", "default", "b")],
    );
    wf.add_node(NodeSpec::new("h", "test.hang"));
    let first = runtime.run(&wf, "user-1", context(&[])).await.unwrap();
    assert_eq!(first.status, ExecutionStatus::Failed);

    let mut fixed = wf.clone();
    if let Some(node) = fixed.nodes.iter_mut().find(|n| n.id == "h") {
        node.node_type = "test.step".to_string();
    }

    let resumed = runtime
        .resume_with(&fixed, first.execution_id, None)
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(trail(&resumed.output), vec!["a", "h", "b"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_during_slow_commit_still_persists_failed() {
    let runtime = runtime_with(short_timeout()).with_store(Arc::new(SlowAckStore::default()));
    let wf = workflow(
        "slow-store",
        &[("a", "test.step"), ("b", "test.step")],
        &[("a", "default", "b")],
    );

    let result = runtime.run(&wf, "user-1", context(&[])).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("timed out"));

    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(record.status(), ExecutionStatus::Failed);
    assert_eq!(checkpoint_nodes(&record), vec!["a"]);
    assert_eq!(record.header.current_step, 1);

    let resumed = runtime
        .resume_with(&wf, result.execution_id, None)
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(trail(&resumed.output), vec!["a", "b"]);
    let record = runtime.get_state(result.execution_id).await.unwrap();
    assert_eq!(checkpoint_nodes(&record), vec!["a", "b"]);
}

#[tokio::test]
async fn test_cancel_stops_running_execution() {
    let runtime = Arc::new(runtime());
    let mut events = runtime.subscribe_events();
    let wf = workflow(
        "cancellable",
        &[("a", "test.step"), ("h", "test.hang")],
        &[("a", "default", "h")],
    );

    let handle = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            runtime
                .run(&wf, "user-1", context(&[("k", Value::from("v"))]))
                .await
        })
    };

    let execution_id = loop {
        match events.recv().await.unwrap() {
            ExecutionEvent::NodeStarted {
                execution_id,
                node_id,
                ..
            } if node_id == "h" => break execution_id,
            _ => {}
        }
    };
    assert!(runtime.is_active(execution_id));
    assert!(runtime.cancel(execution_id));

    let result = handle.await.unwrap().unwrap();
    assert!(!result.success);
    assert!(!result.retryable);
    assert!(result.error.as_deref().unwrap().contains("cancelled"));

    let record = runtime.get_state(execution_id).await.unwrap();
    assert_eq!(record.status(), ExecutionStatus::Failed);
    assert_eq!(checkpoint_nodes(&record), vec!["a"]);
    assert!(!runtime.is_active(execution_id));
    assert!(!runtime.cancel(execution_id));
}

#[tokio::test]
async fn test_concurrent_resume_is_rejected() {
    let runtime = Arc::new(runtime());
    let wf = workflow(
        "busy",
        &[("w", "test.wait"), ("h", "test.hang")],
        &[("w", "default", "h")],
    );
    runtime.register_workflow(wf).await.unwrap();
    let paused = runtime
        .run_workflow("busy", "user-1", context(&[]))
        .await
        .unwrap();
    let execution_id = paused.execution_id;

    let mut events = runtime.subscribe_events();
    let handle = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.resume(execution_id).await })
    };
    loop {
        if let ExecutionEvent::NodeStarted { node_id, .. } = events.recv().await.unwrap() {
            if node_id == "h" {
                break;
            }
        }
    }

    let err = runtime.resume(execution_id).await.unwrap_err();
    assert!(matches!(err, flowcore::FlowError::ExecutionBusy(id) if id == execution_id));
    assert!(err.is_retryable());

    runtime.cancel(execution_id);
    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
}
