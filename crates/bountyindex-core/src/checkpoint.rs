//! Checkpoint protocol: persists "last block fully processed" for crash recovery.
//!
//! The checkpoint is a single scalar stored under one key (default
//! `"indexer:lastBlock"`) in a durable key/value store. It is not
//! transactionally coupled to the projection: it is written strictly after a
//! window's projection writes have committed, so a crash in between replays
//! that window on restart. Handlers are idempotent, which makes the replay
//! safe.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::IndexerError;

/// Default key under which the last processed block is stored.
pub const DEFAULT_CHECKPOINT_KEY: &str = "indexer:lastBlock";

/// Durable key/value store holding checkpoint values.
///
/// Implementations include `MemoryCheckpointStore` here, and
/// `InMemoryStorage` / `SqliteStorage` in `bountyindex-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError>;

    /// Write (upsert) the value stored under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<(), IndexerError>;

    /// Remove `key` (used when resetting an indexer).
    async fn delete(&self, key: &str) -> Result<(), IndexerError>;
}

/// Reads and advances the checkpoint, refusing to ever move it backwards.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    key: String,
    /// Last value read or written by this manager.
    current: Option<u64>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            current: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last known checkpoint value (after `load` or `advance`).
    pub fn current(&self) -> Option<u64> {
        self.current
    }

    /// Load the stored checkpoint (`None` if the key is absent).
    pub async fn load(&mut self) -> Result<Option<u64>, IndexerError> {
        let value = match self.store.get(&self.key).await? {
            Some(raw) => Some(parse_block(&self.key, &raw)?),
            None => None,
        };
        self.current = value;
        Ok(value)
    }

    /// Persist `block_number` as the new checkpoint.
    ///
    /// Call this only after every event up to and including `block_number`
    /// has been applied. Returns `false` (and writes nothing) if the value
    /// would not move the checkpoint forward.
    pub async fn advance(&mut self, block_number: u64) -> Result<bool, IndexerError> {
        if let Some(current) = self.current {
            if block_number <= current {
                if block_number < current {
                    tracing::debug!(
                        current,
                        requested = block_number,
                        "ignoring checkpoint regression"
                    );
                }
                return Ok(false);
            }
        }
        self.store
            .set(&self.key, &block_number.to_string())
            .await?;
        self.current = Some(block_number);
        tracing::debug!(key = %self.key, block = block_number, "checkpoint advanced");
        Ok(true)
    }

    /// Delete the checkpoint so the next run starts from the configured start block.
    pub async fn reset(&mut self) -> Result<(), IndexerError> {
        self.store.delete(&self.key).await?;
        self.current = None;
        Ok(())
    }
}

fn parse_block(key: &str, raw: &str) -> Result<u64, IndexerError> {
    raw.trim().parse::<u64>().map_err(|e| {
        IndexerError::Checkpoint(format!("value '{raw}' under '{key}' is not a block number: {e}"))
    })
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, IndexerError> {
        self.data
            .lock()
            .map_err(|_| IndexerError::Storage("checkpoint mutex poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), IndexerError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), IndexerError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (Arc<MemoryCheckpointStore>, CheckpointManager) {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mgr = CheckpointManager::new(store.clone(), DEFAULT_CHECKPOINT_KEY);
        (store, mgr)
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let (store, mut mgr) = manager();

        // No checkpoint initially
        assert!(mgr.load().await.unwrap().is_none());

        assert!(mgr.advance(1000).await.unwrap());
        assert_eq!(mgr.load().await.unwrap(), Some(1000));
        assert_eq!(
            store.get("indexer:lastBlock").await.unwrap().as_deref(),
            Some("1000")
        );
    }

    #[tokio::test]
    async fn checkpoint_never_moves_backwards() {
        let (_store, mut mgr) = manager();
        let mut seen = vec![];
        for block in [10, 25, 20, 25, 40, 5] {
            mgr.advance(block).await.unwrap();
            seen.push(mgr.load().await.unwrap().unwrap());
        }
        assert_eq!(seen, vec![10, 25, 25, 25, 40, 40]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn corrupt_value_is_an_error() {
        let (store, mut mgr) = manager();
        store.set(DEFAULT_CHECKPOINT_KEY, "not-a-number").await.unwrap();
        let err = mgr.load().await.unwrap_err();
        assert!(matches!(err, IndexerError::Checkpoint(_)));
    }

    #[tokio::test]
    async fn reset_removes_checkpoint() {
        let (_store, mut mgr) = manager();
        mgr.advance(77).await.unwrap();
        mgr.reset().await.unwrap();
        assert!(mgr.load().await.unwrap().is_none());
        // After a reset the checkpoint may start again from a lower block.
        assert!(mgr.advance(3).await.unwrap());
    }
}
