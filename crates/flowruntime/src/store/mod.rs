//! Durable storage for execution records.
//!
//! The header and the checkpoint log are kept apart: headers are replaced on
//! every write, checkpoints are only ever appended. A commit covers both, so a
//! reader never sees a checkpoint without the header that accounts for it.

mod file;
mod memory;

use async_trait::async_trait;
use flowcore::{Checkpoint, ExecutionHeader, ExecutionId, ExecutionRecord, StoreError};

pub use file::FileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a brand-new execution with an empty checkpoint log.
    async fn insert(&self, header: &ExecutionHeader) -> Result<(), StoreError>;

    /// Append `appended` to the log and replace the header, atomically.
    ///
    /// Fails with [`StoreError::Conflict`] when the stored header's version is
    /// not `expected_version`.
    async fn commit(
        &self,
        header: &ExecutionHeader,
        appended: &[Checkpoint],
        expected_version: u64,
    ) -> Result<(), StoreError>;

    async fn load_header(&self, id: ExecutionId) -> Result<Option<ExecutionHeader>, StoreError>;

    /// Committed checkpoints with `sequence >= from_sequence`, in order.
    async fn load_checkpoints(
        &self,
        id: ExecutionId,
        from_sequence: u64,
    ) -> Result<Vec<Checkpoint>, StoreError>;

    /// Headers, newest first, optionally for one workflow.
    async fn list(&self, workflow_id: Option<&str>) -> Result<Vec<ExecutionHeader>, StoreError>;

    async fn load(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>, StoreError> {
        let Some(header) = self.load_header(id).await? else {
            return Ok(None);
        };
        let mut checkpoints = self.load_checkpoints(id, 0).await?;
        // A commit may land between the two reads; the header is authoritative.
        checkpoints.truncate(header.checkpoint_count as usize);
        Ok(Some(ExecutionRecord {
            header,
            checkpoints,
        }))
    }
}

fn check_version(header: &ExecutionHeader, expected_version: u64) -> Result<(), StoreError> {
    if header.version != expected_version {
        return Err(StoreError::Conflict {
            execution_id: header.id,
            expected: expected_version,
            found: header.version,
        });
    }
    Ok(())
}

fn newest_first(headers: &mut [ExecutionHeader]) {
    headers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
