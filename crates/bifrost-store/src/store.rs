use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;
use crate::traits::SnapshotBackend;

/// What to do when an existing snapshot cannot be parsed.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPolicy {
    /// Refuse to open the store.
    #[default]
    Fail,
    /// Move the snapshot aside and start empty.
    Quarantine,
}

/// In-memory map persisted as a full snapshot after every mutation.
///
/// Reads clone out of a shared lock. Mutations are serialised: each one is
/// applied to a copy of the map, written through the backend, and committed
/// to memory only once the write succeeded.
#[derive(Debug)]
pub struct Store<V> {
    backend: Arc<dyn SnapshotBackend>,
    entries: RwLock<BTreeMap<String, V>>,
    write_lock: Mutex<()>,
}

impl<V> Store<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Opens the store, loading the backend's snapshot if one exists.
    pub async fn open(
        backend: Arc<dyn SnapshotBackend>,
        policy: CorruptPolicy,
    ) -> Result<Self, StoreError> {
        let started = Instant::now();
        let resource = backend.resource();

        let entries = match backend.load().await? {
            None => {
                tracing::info!(resource = %resource, "No snapshot found, starting empty");
                BTreeMap::new()
            }
            Some(bytes) => match serde_json::from_slice::<BTreeMap<String, V>>(&bytes) {
                Ok(entries) => {
                    tracing::info!(
                        resource = %resource,
                        entries = entries.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Store loaded"
                    );
                    entries
                }
                Err(e) if policy == CorruptPolicy::Quarantine => {
                    let moved_to = backend.quarantine().await?;
                    tracing::warn!(
                        resource = %resource,
                        moved_to = moved_to.as_deref().unwrap_or("-"),
                        error = %e,
                        "Snapshot is corrupt, quarantined and starting empty"
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        resource,
                        reason: e.to_string(),
                    });
                }
            },
        };

        Ok(Self {
            backend,
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        })
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Inserts or overwrites `key`, returning the previous value.
    pub async fn set(&self, key: &str, value: V) -> Result<Option<V>, StoreError> {
        let previous = self
            .mutate(|entries| Some(entries.insert(key.to_owned(), value)))
            .await?;
        Ok(previous.flatten())
    }

    /// Removes `key`, returning the removed value. Absent keys cause no write.
    pub async fn delete(&self, key: &str) -> Result<Option<V>, StoreError> {
        self.mutate(|entries| entries.remove(key)).await
    }

    /// Inserts `value` only if `key` is vacant. Returns whether it was inserted.
    pub async fn insert_if_absent(&self, key: &str, value: V) -> Result<bool, StoreError> {
        let inserted = self
            .mutate(|entries| {
                if entries.contains_key(key) {
                    None
                } else {
                    entries.insert(key.to_owned(), value);
                    Some(())
                }
            })
            .await?;
        Ok(inserted.is_some())
    }

    /// Overwrites `key` only if it exists, returning the replaced value.
    pub async fn replace_if_present(&self, key: &str, value: V) -> Result<Option<V>, StoreError> {
        self.mutate(|entries| {
            entries
                .get_mut(key)
                .map(|slot| std::mem::replace(slot, value))
        })
        .await
    }

    /// Applies `apply` to a copy of the map and persists it.
    ///
    /// `apply` returning `None` means nothing changed and nothing is written.
    async fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, V>) -> Option<R>,
    ) -> Result<Option<R>, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut candidate = self.entries.read().await.clone();
        let Some(result) = apply(&mut candidate) else {
            return Ok(None);
        };

        let snapshot = serde_json::to_vec_pretty(&candidate)?;
        self.backend.save(&snapshot).await?;

        let count = candidate.len();
        *self.entries.write().await = candidate;

        tracing::debug!(
            resource = %self.backend.resource(),
            entries = count,
            bytes = snapshot.len(),
            "Snapshot written"
        );

        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use async_trait::async_trait;

    async fn open_memory(backend: &MemoryBackend) -> Store<String> {
        Store::open(Arc::new(backend.clone()), CorruptPolicy::Fail)
            .await
            .unwrap()
    }

    #[derive(Debug)]
    struct FailingBackend;

    #[async_trait]
    impl SnapshotBackend for FailingBackend {
        fn resource(&self) -> String {
            "failing".to_owned()
        }

        async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        async fn save(&self, _snapshot: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".into()))
        }

        async fn quarantine(&self) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn starts_empty_without_snapshot() {
        let backend = MemoryBackend::new();
        let store = open_memory(&backend).await;

        assert!(store.is_empty().await);
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn every_mutation_writes_full_snapshot() {
        let backend = MemoryBackend::new();
        let store = open_memory(&backend).await;

        assert!(store.set("a", "1".into()).await.unwrap().is_none());
        assert_eq!(
            store.set("a", "2".into()).await.unwrap().as_deref(),
            Some("1")
        );
        store.set("b", "3".into()).await.unwrap();
        assert_eq!(store.delete("a").await.unwrap().as_deref(), Some("2"));

        assert_eq!(backend.save_count(), 4);
        let snapshot: BTreeMap<String, String> =
            serde_json::from_slice(&backend.snapshot().await.unwrap()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["b"], "3");
    }

    #[tokio::test]
    async fn reopen_restores_entries() {
        let backend = MemoryBackend::new();
        {
            let store = open_memory(&backend).await;
            store.set("GET::hello", "world".into()).await.unwrap();
        }

        let reopened = open_memory(&backend).await;
        assert_eq!(reopened.get("GET::hello").await.as_deref(), Some("world"));
        assert_eq!(reopened.keys().await, vec!["GET::hello".to_owned()]);
    }

    #[tokio::test]
    async fn delete_of_missing_key_skips_write() {
        let backend = MemoryBackend::new();
        let store = open_memory(&backend).await;

        assert!(store.delete("nope").await.unwrap().is_none());
        assert_eq!(backend.save_count(), 0);
    }

    #[tokio::test]
    async fn insert_if_absent_keeps_existing_value() {
        let backend = MemoryBackend::new();
        let store = open_memory(&backend).await;

        assert!(store.insert_if_absent("k", "first".into()).await.unwrap());
        assert!(!store.insert_if_absent("k", "second".into()).await.unwrap());
        assert_eq!(store.get("k").await.as_deref(), Some("first"));
        assert_eq!(backend.save_count(), 1);
    }

    #[tokio::test]
    async fn replace_if_present_requires_existing_key() {
        let backend = MemoryBackend::new();
        let store = open_memory(&backend).await;

        assert!(store
            .replace_if_present("k", "v".into())
            .await
            .unwrap()
            .is_none());
        assert!(!store.contains_key("k").await);

        store.set("k", "old".into()).await.unwrap();
        assert_eq!(
            store
                .replace_if_present("k", "new".into())
                .await
                .unwrap()
                .as_deref(),
            Some("old")
        );
        assert_eq!(store.get("k").await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn corrupt_snapshot_fails_by_default() {
        let backend = MemoryBackend::with_snapshot("{not json");
        let result = Store::<String>::open(Arc::new(backend), CorruptPolicy::Fail).await;

        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_quarantined_on_request() {
        let backend = MemoryBackend::with_snapshot("{not json");
        let store = Store::<String>::open(Arc::new(backend.clone()), CorruptPolicy::Quarantine)
            .await
            .unwrap();

        assert!(store.is_empty().await);
        assert!(backend.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_untouched() {
        let store = Store::<String>::open(Arc::new(FailingBackend), CorruptPolicy::Fail)
            .await
            .unwrap();

        assert!(store.set("k", "v".into()).await.is_err());
        assert!(store.get("k").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_creates_admit_exactly_one() {
        let backend = MemoryBackend::new();
        let store = Arc::new(open_memory(&backend).await);

        let attempts: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.insert_if_absent("k", i.to_string()).await })
            })
            .collect();

        let mut inserted = 0;
        for attempt in attempts {
            if attempt.await.unwrap().unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(backend.save_count(), 1);
    }
}
