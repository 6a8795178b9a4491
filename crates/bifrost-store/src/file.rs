use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;
use crate::traits::SnapshotBackend;

/// Stores the snapshot as `<dir>/<name>.json`.
///
/// Writes land in `<name>.json.tmp` first and are renamed over the live file,
/// so a reader never observes a half-written snapshot.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
    name: String,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", self.name))
    }

    fn quarantine_path(&self) -> PathBuf {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.dir.join(format!("{}.json.corrupt-{secs}", self.name))
    }
}

#[async_trait]
impl SnapshotBackend for FileBackend {
    fn resource(&self) -> String {
        self.path().display().to_string()
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.path()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, snapshot: &[u8]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let temp = self.temp_path();
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(snapshot).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp, self.path()).await?;
        Ok(())
    }

    async fn quarantine(&self) -> Result<Option<String>, StoreError> {
        let path = self.path();
        if !exists(&path).await? {
            return Ok(None);
        }

        let target = self.quarantine_path();
        tokio::fs::rename(&path, &target).await?;
        Ok(Some(target.display().to_string()))
    }
}

async fn exists(path: &Path) -> Result<bool, StoreError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_snapshot_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path(), "routes");

        assert!(backend.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_creates_directory_and_replaces_snapshot() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("nested/data"), "routes");

        backend.save(b"{\"a\":1}").await.unwrap();
        backend.save(b"{\"b\":2}").await.unwrap();

        assert_eq!(backend.load().await.unwrap().unwrap(), b"{\"b\":2}");
        assert!(backend.path().ends_with("nested/data/routes.json"));
        assert!(!backend.temp_path().exists());
    }

    #[tokio::test]
    async fn quarantine_moves_file_aside() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path(), "routes");
        backend.save(b"not json").await.unwrap();

        let moved = backend.quarantine().await.unwrap().unwrap();

        assert!(moved.contains("routes.json.corrupt-"));
        assert!(backend.load().await.unwrap().is_none());
        assert_eq!(std::fs::read(&moved).unwrap(), b"not json");
    }

    #[tokio::test]
    async fn quarantine_without_snapshot_is_noop() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path(), "routes");

        assert!(backend.quarantine().await.unwrap().is_none());
    }
}
