//! Persisted execution records: status, header and the checkpoint log.

use crate::{Context, ExecutionId, NodeId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl ExecutionStatus {
    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Paused)
                | (Paused, Running)
                | (Paused, Failed)
                | (Failed, Running)
                | (Failed, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Immutable snapshot taken after a node succeeded or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: Uuid,
    /// Position in the execution's checkpoint log, starting at 0.
    pub sequence: u64,
    pub node_id: NodeId,
    pub node_name: String,
    pub step_number: u32,
    pub context: Context,
    /// Continuation queue as of this checkpoint: what a resumed run dispatches.
    #[serde(default)]
    pub pending: Vec<NodeId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Checkpoint {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The checkpoint-free part of an execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionHeader {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub user_id: String,
    pub status: ExecutionStatus,
    pub context: Context,
    pub current_step: u32,
    pub total_steps: u32,
    #[serde(default)]
    pub error: Option<String>,
    /// Bumped by every durable write.
    pub version: u64,
    /// Number of entries in the checkpoint log covered by this header.
    pub checkpoint_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full persisted execution as read by status viewers and resume callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    #[serde(flatten)]
    pub header: ExecutionHeader,
    pub checkpoints: Vec<Checkpoint>,
}

impl ExecutionRecord {
    pub fn id(&self) -> ExecutionId {
        self.header.id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.header.status
    }

    pub fn last_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }
}

/// Where a resumed run picks up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub node_id: NodeId,
    pub step_number: u32,
    /// The checkpoint recorded a failure, so the node never committed.
    pub failed: bool,
    pub pending: Vec<NodeId>,
}
