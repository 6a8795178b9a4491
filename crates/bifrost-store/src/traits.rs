use async_trait::async_trait;

use crate::error::StoreError;

/// Durable home of a store snapshot.
///
/// A backend only ever sees whole snapshots: `save` replaces the previous one
/// and must be atomic for anyone reading the resource concurrently.
#[async_trait]
pub trait SnapshotBackend: Send + Sync + std::fmt::Debug {
    /// Human-readable location of the snapshot, used in logs and errors.
    fn resource(&self) -> String;

    /// Returns `None` when no snapshot has ever been written.
    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;

    async fn save(&self, snapshot: &[u8]) -> Result<(), StoreError>;

    /// Moves an unreadable snapshot out of the way and returns where it went.
    async fn quarantine(&self) -> Result<Option<String>, StoreError>;
}
