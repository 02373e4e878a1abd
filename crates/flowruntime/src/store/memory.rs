use super::{check_version, newest_first, ExecutionStore};
use async_trait::async_trait;
use flowcore::{Checkpoint, ExecutionHeader, ExecutionId, StoreError};
use std::collections::HashMap;
use tokio::sync::RwLock;

struct StoredExecution {
    header: ExecutionHeader,
    log: Vec<Checkpoint>,
}

/// In-process store; every commit happens under one write lock.
#[derive(Default)]
pub struct MemoryStore {
    executions: RwLock<HashMap<ExecutionId, StoredExecution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn insert(&self, header: &ExecutionHeader) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&header.id) {
            return Err(StoreError::AlreadyExists(header.id));
        }
        executions.insert(
            header.id,
            StoredExecution {
                header: header.clone(),
                log: Vec::new(),
            },
        );
        Ok(())
    }

    async fn commit(
        &self,
        header: &ExecutionHeader,
        appended: &[Checkpoint],
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        let stored = executions
            .get_mut(&header.id)
            .ok_or(StoreError::NotFound(header.id))?;
        check_version(&stored.header, expected_version)?;

        stored.log.extend_from_slice(appended);
        stored.header = header.clone();
        Ok(())
    }

    async fn load_header(&self, id: ExecutionId) -> Result<Option<ExecutionHeader>, StoreError> {
        let executions = self.executions.read().await;
        Ok(executions.get(&id).map(|stored| stored.header.clone()))
    }

    async fn load_checkpoints(
        &self,
        id: ExecutionId,
        from_sequence: u64,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        let executions = self.executions.read().await;
        let stored = executions.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(stored
            .log
            .iter()
            .filter(|cp| cp.sequence >= from_sequence)
            .cloned()
            .collect())
    }

    async fn list(&self, workflow_id: Option<&str>) -> Result<Vec<ExecutionHeader>, StoreError> {
        let executions = self.executions.read().await;
        let mut headers: Vec<ExecutionHeader> = executions
            .values()
            .map(|stored| &stored.header)
            .filter(|header| workflow_id.map_or(true, |wf| header.workflow_id == wf))
            .cloned()
            .collect();
        newest_first(&mut headers);
        Ok(headers)
    }
}
