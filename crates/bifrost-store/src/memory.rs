use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::traits::SnapshotBackend;

/// Keeps the latest snapshot in memory. Clones share the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    snapshot: Arc<RwLock<Option<Vec<u8>>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: impl Into<Vec<u8>>) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(Some(snapshot.into()))),
            ..Self::default()
        }
    }

    pub async fn snapshot(&self) -> Option<Vec<u8>> {
        self.snapshot.read().await.clone()
    }

    /// Number of snapshots written since construction.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    fn resource(&self) -> String {
        "memory".to_owned()
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save(&self, snapshot: &[u8]) -> Result<(), StoreError> {
        *self.snapshot.write().await = Some(snapshot.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn quarantine(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .snapshot
            .write()
            .await
            .take()
            .map(|_| "discarded".to_owned()))
    }
}
