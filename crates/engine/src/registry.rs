//! Persisted snapshot registry
//!
//! One JSON file per storage root holding the list of [`Snapshot`] records.
//! Mutations are serialized by an exclusive advisory lock on a sibling lock
//! file, so every writer against the same root contends (across processes as
//! well as within one) while independent roots never do. The registry file is
//! replaced atomically via temp file and rename, so readers observe either the
//! previous or the next state and never a partial write.

use crate::error::FsContext;
use crate::types::Snapshot;
use crate::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Registry of snapshot records for one storage root
#[derive(Debug, Clone)]
pub struct SnapshotRegistry {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Held exclusive lock on the registry. Released on drop.
#[derive(Debug)]
pub struct RegistryLock {
    file: File,
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release registry lock: {}", e);
        }
    }
}

impl SnapshotRegistry {
    pub fn new(path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_path: lock_path.into(),
        }
    }

    /// Path of the registry file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records.
    ///
    /// A missing file is an empty registry. An unparsable file is reported as
    /// [`Error::RegistryCorruption`].
    pub async fn load(&self) -> Result<Vec<Snapshot>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).fs_context("read registry", &self.path),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            Error::RegistryCorruption(format!("{}: {}", self.path.display(), e))
        })
    }

    /// Acquire the exclusive writer lock for this storage root
    pub async fn lock(&self) -> Result<RegistryLock> {
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || -> Result<RegistryLock> {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&lock_path)
                .fs_context("open registry lock", &lock_path)?;
            file.lock_exclusive()
                .fs_context("lock registry", &lock_path)?;
            Ok(RegistryLock { file })
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    /// Read-modify-write the registry under the writer lock.
    ///
    /// The closure sees the current records; if it returns an error nothing is
    /// written. A corrupted registry fails the update rather than being
    /// overwritten.
    pub async fn update<R>(
        &self,
        mutate: impl FnOnce(&mut Vec<Snapshot>) -> Result<R>,
    ) -> Result<R> {
        let _lock = self.lock().await?;

        let mut records = self.load().await?;
        let result = mutate(&mut records)?;
        self.persist(&records).await?;

        debug!(
            "Registry {} updated ({} records)",
            self.path.display(),
            records.len()
        );
        Ok(result)
    }

    /// Insert a record, replacing any record with the same id
    pub async fn upsert(&self, snapshot: Snapshot) -> Result<()> {
        self.update(|records| {
            records.retain(|r| r.id != snapshot.id);
            records.push(snapshot);
            Ok(())
        })
        .await
    }

    /// Remove a record by id, returning it if present
    pub async fn remove(&self, id: &str) -> Result<Option<Snapshot>> {
        self.update(|records| {
            let position = records.iter().position(|r| r.id == id);
            Ok(position.map(|i| records.remove(i)))
        })
        .await
    }

    async fn persist(&self, records: &[Snapshot]) -> Result<()> {
        let data = serde_json::to_vec_pretty(records)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "registry".to_string());
        let tmp_path = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        fs::write(&tmp_path, &data)
            .await
            .fs_context("write registry", &tmp_path)?;
        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e).fs_context("replace registry", &self.path);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SnapshotFormat, SnapshotMetadata};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(id: &str) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            name: format!("snap-{}", id),
            format: SnapshotFormat::Sql,
            file_path: PathBuf::from(format!("/tmp/{}.sql", id)),
            size: 0,
            checksum: String::new(),
            created_at: chrono::Utc::now(),
            metadata: SnapshotMetadata::default(),
        }
    }

    fn registry(tmp: &TempDir) -> SnapshotRegistry {
        SnapshotRegistry::new(
            tmp.path().join("snapshots.json"),
            tmp.path().join("snapshots.lock"),
        )
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(registry(&tmp).load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_and_remove() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);

        registry.upsert(record("a")).await.unwrap();
        registry.upsert(record("b")).await.unwrap();
        registry.upsert(record("a")).await.unwrap();

        let ids: Vec<_> = registry.load().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let removed = registry.remove("b").await.unwrap();
        assert_eq!(removed.map(|r| r.id), Some("b".to_string()));
        assert!(registry.remove("b").await.unwrap().is_none());
        assert_eq!(registry.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corruption_detected_and_not_overwritten() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);
        fs::write(registry.path(), b"{not valid").await.unwrap();

        assert!(matches!(
            registry.load().await,
            Err(Error::RegistryCorruption(_))
        ));
        assert!(matches!(
            registry.upsert(record("a")).await,
            Err(Error::RegistryCorruption(_))
        ));
        assert_eq!(fs::read(registry.path()).await.unwrap(), b"{not valid");
    }

    #[tokio::test]
    async fn test_failed_mutation_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);
        registry.upsert(record("a")).await.unwrap();

        let result: Result<()> = registry
            .update(|records| {
                records.clear();
                Err(Error::InvalidOptions("abort".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(registry.load().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_are_not_lost() {
        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(registry(&tmp));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.upsert(record(&i.to_string())).await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert_eq!(registry.load().await.unwrap().len(), 16);
    }
}
