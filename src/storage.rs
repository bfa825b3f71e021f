//! Durable storage implementations
//!
//! The engine only ever sees the `DurableStorage` trait; these are the two
//! stock implementations. `JsonFileStorage` persists the whole store as one
//! JSON document with write-to-temp-then-rename atomicity, so a crash
//! mid-write leaves the previous blob intact. `MemoryStorage` backs tests
//! and previews.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::DurableStorage;
use crate::error::StorageError;
use crate::record::PoemRecord;

/// Whole-store JSON persistence at a fixed path
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DurableStorage for JsonFileStorage {
    async fn load_all(&self) -> Result<Vec<PoemRecord>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError(format!("corrupt store file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError(format!("read failed: {e}"))),
        }
    }

    async fn save_all(&self, records: &[PoemRecord]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| StorageError(format!("serialize failed: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StorageError(format!("write failed: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError(format!("rename failed: {e}")))?;

        debug!(count = records.len(), path = %self.path.display(), "store persisted");
        Ok(())
    }
}

/// In-memory storage for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<Vec<PoemRecord>>,
}

#[async_trait]
impl DurableStorage for MemoryStorage {
    async fn load_all(&self) -> Result<Vec<PoemRecord>, StorageError> {
        Ok(self.records.lock().await.clone())
    }

    async fn save_all(&self, records: &[PoemRecord]) -> Result<(), StorageError> {
        *self.records.lock().await = records.to_vec();
        Ok(())
    }
}
