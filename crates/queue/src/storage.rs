//! Durable storage for the queue.
//!
//! The queue persists as one serialized blob under a single well-known
//! key. The storage medium itself is abstract: anything that can `get`
//! and `set` opaque bytes works. [`QueueStore`] layers the serialization
//! format and the load/save failure semantics on top of a [`BlobStore`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::errors::{QueueError, QueueResult};
use crate::types::OperationRecord;

/// Persistence format version
const PERSISTENCE_VERSION: u32 = 1;

/// Abstract key-value blob store the queue persists into.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the blob stored under `key`, if any.
    async fn get(&self, key: &str) -> QueueResult<Option<Vec<u8>>>;

    /// Write `value` under `key`, replacing any prior blob.
    async fn set(&self, key: &str, value: &[u8]) -> QueueResult<()>;
}

/// In-memory blob store for tests and ephemeral queues.
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, key: &str) -> QueueResult<Option<Vec<u8>>> {
        let blobs = self.blobs.read().map_err(QueueError::lock)?;
        Ok(blobs.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> QueueResult<()> {
        let mut blobs = self.blobs.write().map_err(QueueError::lock)?;
        blobs.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// File-backed blob store: one file per key under a root directory.
///
/// Writes go to a temporary file first and are moved into place with an
/// atomic rename, so a crash mid-write never corrupts the previous blob.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait]
impl BlobStore for FileStore {
    async fn get(&self, key: &str) -> QueueResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> QueueResult<()> {
        let path = self.path_for(key);
        let temp_path = path.with_extension("tmp");

        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(value).await?;
        file.sync_all().await?;
        drop(file);

        // Atomic rename
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }
}

/// Persisted queue envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedQueue {
    version: u32,
    saved_at: u64,
    records: Vec<OperationRecord>,
}

/// Loads and saves the whole queue as one serialized collection.
pub struct QueueStore {
    store: Arc<dyn BlobStore>,
    key: String,
}

impl QueueStore {
    /// Wrap a blob store with the queue's serialization format.
    pub fn new(store: Arc<dyn BlobStore>, key: impl Into<String>) -> Self {
        Self { store, key: key.into() }
    }

    /// Load the persisted queue.
    ///
    /// A missing, unreadable or corrupt blob yields an empty queue rather
    /// than an error: on a fresh install there is nothing to load, and a
    /// corrupt blob must never keep the manager from starting.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn load(&self) -> Vec<OperationRecord> {
        let bytes = match self.store.get(&self.key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("no persisted queue found, starting empty");
                return Vec::new();
            }
            Err(e) => {
                warn!("failed to read persisted queue, starting empty: {e}");
                return Vec::new();
            }
        };

        match serde_json::from_slice::<PersistedQueue>(&bytes) {
            Ok(persisted) => {
                if persisted.version != PERSISTENCE_VERSION {
                    warn!(
                        "persistence version mismatch: expected {}, got {}",
                        PERSISTENCE_VERSION, persisted.version
                    );
                }
                info!("loaded {} persisted operations", persisted.records.len());
                persisted.records
            }
            Err(e) => {
                warn!("corrupt persisted queue, starting empty: {e}");
                Vec::new()
            }
        }
    }

    /// Save the full queue under the configured key.
    #[instrument(skip(self, records), fields(key = %self.key, count = records.len()))]
    pub async fn save(&self, records: &[OperationRecord], now: u64) -> QueueResult<()> {
        let envelope = PersistedQueue {
            version: PERSISTENCE_VERSION,
            saved_at: now,
            records: records.to_vec(),
        };
        let bytes = serde_json::to_vec(&envelope)?;
        self.store.set(&self.key, &bytes).await?;
        debug!("persisted {} operations ({} bytes)", records.len(), bytes.len());
        Ok(())
    }
}
