//! Container checkpoint storage
//!
//! Each container lives in `<repository>/<id>/` and its record is stored as a
//! single MessagePack blob. Writes go to a temporary file first and are
//! renamed into place so a crash never leaves a torn checkpoint behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::container::ContainerRecord;

/// File name of the checkpoint blob inside a container directory
pub const CHECKPOINT_FILE: &str = "checkpoint.msgpack";

#[async_trait]
pub trait Store: Send + Sync {
    async fn load(&self, id: &str) -> Result<ContainerRecord, StoreError>;

    /// Persist a record. Callers must hold the container's lock.
    async fn checkpoint(&self, record: &ContainerRecord) -> Result<(), StoreError>;
}

/// Store backed by the daemon's container repository directory
#[derive(Debug, Clone)]
pub struct FileStore {
    repository: PathBuf,
}

impl FileStore {
    pub fn new(repository: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
        }
    }

    pub fn repository(&self) -> &Path {
        &self.repository
    }

    fn checkpoint_path(&self, id: &str) -> PathBuf {
        self.repository.join(id).join(CHECKPOINT_FILE)
    }
}

#[async_trait]
impl Store for FileStore {
    async fn load(&self, id: &str) -> Result<ContainerRecord, StoreError> {
        let path = self.checkpoint_path(id);
        let data = tokio::fs::read(&path).await.map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let record: ContainerRecord = rmp_serde::from_slice(&data)?;
        if record.id != id {
            return Err(StoreError::IdMismatch {
                expected: id.to_string(),
                found: record.id,
            });
        }
        Ok(record)
    }

    async fn checkpoint(&self, record: &ContainerRecord) -> Result<(), StoreError> {
        let dir = self.repository.join(&record.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;

        let data = rmp_serde::to_vec_named(record)?;
        let tmp = dir.join(format!(".{}.tmp", CHECKPOINT_FILE));
        write_synced(&tmp, &data)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;

        let path = dir.join(CHECKPOINT_FILE);
        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Io { path, source });
        }

        // Make the rename itself durable
        sync_dir(&dir).await.map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })
    }
}

/// Write `data` to `path` and flush it to disk before returning
async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to decode checkpoint: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Failed to encode checkpoint: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Checkpoint belongs to {found}, expected {expected}")]
    IdMismatch { expected: String, found: String },
}
