use super::{check_version, newest_first, ExecutionStore};
use async_trait::async_trait;
use flowcore::{Checkpoint, ExecutionHeader, ExecutionId, StoreError};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

const HEADER_FILE: &str = "record.json";
const LOG_FILE: &str = "checkpoints.jsonl";

/// Header as stored on disk: the committed length of the log travels with it.
#[derive(Serialize, Deserialize)]
struct StoredHeader {
    #[serde(flatten)]
    header: ExecutionHeader,
    log_bytes: u64,
}

/// Directory-per-execution store surviving process restarts.
///
/// `<root>/<execution id>/record.json` is replaced by write-then-rename;
/// `checkpoints.jsonl` is appended to. Bytes past the header's `log_bytes`
/// belong to a commit that never finished and are ignored, then truncated by
/// the next commit.
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "opened file execution store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, id: ExecutionId) -> PathBuf {
        self.root.join(id.to_string())
    }

    async fn read_header(&self, id: ExecutionId) -> Result<Option<StoredHeader>, StoreError> {
        read_header_at(&self.dir(id).join(HEADER_FILE)).await
    }

    async fn write_header(&self, stored: &StoredHeader) -> Result<(), StoreError> {
        let dir = self.dir(stored.header.id);
        let tmp = dir.join(format!("{HEADER_FILE}.tmp"));
        let bytes = serde_json::to_vec_pretty(stored)?;

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, dir.join(HEADER_FILE)).await?;
        Ok(())
    }
}

async fn read_header_at(path: &Path) -> Result<Option<StoredHeader>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ExecutionStore for FileStore {
    async fn insert(&self, header: &ExecutionHeader) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.read_header(header.id).await?.is_some() {
            return Err(StoreError::AlreadyExists(header.id));
        }

        fs::create_dir_all(self.dir(header.id)).await?;
        self.write_header(&StoredHeader {
            header: header.clone(),
            log_bytes: 0,
        })
        .await
    }

    async fn commit(
        &self,
        header: &ExecutionHeader,
        appended: &[Checkpoint],
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .read_header(header.id)
            .await?
            .ok_or(StoreError::NotFound(header.id))?;
        check_version(&current.header, expected_version)?;

        let mut log_bytes = current.log_bytes;
        if !appended.is_empty() {
            let mut buf = Vec::new();
            for checkpoint in appended {
                serde_json::to_writer(&mut buf, checkpoint)?;
                buf.push(b'\n');
            }

            let mut log = OpenOptions::new()
                .create(true)
                .write(true)
                .open(self.dir(header.id).join(LOG_FILE))
                .await?;
            log.set_len(current.log_bytes).await?;
            log.seek(SeekFrom::Start(current.log_bytes)).await?;
            log.write_all(&buf).await?;
            log.sync_all().await?;
            log_bytes += buf.len() as u64;
        }

        self.write_header(&StoredHeader {
            header: header.clone(),
            log_bytes,
        })
        .await
    }

    async fn load_header(&self, id: ExecutionId) -> Result<Option<ExecutionHeader>, StoreError> {
        Ok(self.read_header(id).await?.map(|stored| stored.header))
    }

    async fn load_checkpoints(
        &self,
        id: ExecutionId,
        from_sequence: u64,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        let stored = self.read_header(id).await?.ok_or(StoreError::NotFound(id))?;
        if stored.log_bytes == 0 {
            return Ok(Vec::new());
        }

        let bytes = fs::read(self.dir(id).join(LOG_FILE)).await?;
        let committed = &bytes[..bytes.len().min(stored.log_bytes as usize)];

        let mut checkpoints = Vec::new();
        for line in committed.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
            let checkpoint: Checkpoint = serde_json::from_slice(line)?;
            if checkpoint.sequence >= from_sequence {
                checkpoints.push(checkpoint);
            }
        }
        Ok(checkpoints)
    }

    async fn list(&self, workflow_id: Option<&str>) -> Result<Vec<ExecutionHeader>, StoreError> {
        let mut headers = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match read_header_at(&entry.path().join(HEADER_FILE)).await {
                Ok(Some(stored)) => {
                    if workflow_id.map_or(true, |wf| stored.header.workflow_id == wf) {
                        headers.push(stored.header);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable execution record");
                }
            }
        }
        newest_first(&mut headers);
        Ok(headers)
    }
}
