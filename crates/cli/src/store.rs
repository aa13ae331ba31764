//! Dataset-file backing store
//!
//! Restores snapshot payloads into a dataset JSON file on disk, the same
//! shape `snapshot create --dataset` and `migrate --dataset` read.

use async_trait::async_trait;
use fieldcheck_engine::{codec, BackingStore, Dataset, Error, Result, SnapshotFormat};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Backing store writing restored tables into a dataset JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Version stamped on a file that does not exist yet
    default_version: String,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, default_version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            default_version: default_version.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Dataset> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::BackingStore(format!("{} is not a dataset file: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Dataset::new(self.default_version.clone()))
            }
            Err(e) => Err(Error::BackingStore(format!(
                "cannot read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write(&self, dataset: &Dataset) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut bytes = serde_json::to_vec_pretty(dataset)?;
        bytes.push(b'\n');
        fs::write(&self.path, bytes)
            .await
            .map_err(|e| Error::BackingStore(format!("cannot write {}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl BackingStore for JsonFileStore {
    async fn apply(&self, payload: &[u8], format: SnapshotFormat) -> Result<()> {
        let tables = codec::decode(payload, format)?;
        let mut dataset = self.read().await?;
        for (name, records) in tables {
            debug!("Writing {} rows of {} to {:?}", records.len(), name, self.path);
            dataset.tables.entry(name).or_default().extend(records);
        }
        self.write(&dataset).await
    }

    async fn drop_all(&self) -> Result<()> {
        let mut dataset = self.read().await?;
        dataset.tables.clear();
        self.write(&dataset).await
    }

    async fn row_counts(&self) -> Result<BTreeMap<String, usize>> {
        Ok(self
            .read()
            .await?
            .tables
            .iter()
            .map(|(name, rows)| (name.clone(), rows.len()))
            .collect())
    }
}
