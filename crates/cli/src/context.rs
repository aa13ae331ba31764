//! Shared command context: resolved configuration plus engine handles

use anyhow::{Context as _, Result};
use fieldcheck_engine::{
    Dataset, EngineConfig, MigrationExecutor, MigrationPlanner, SnapshotManager, VersionRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::output::OutputFormat;

pub struct Context {
    pub config: EngineConfig,
    pub versions: Arc<VersionRegistry>,
    pub format: OutputFormat,
}

impl Context {
    /// Load configuration from `config_path` (defaults when absent) and apply
    /// the `--root` override.
    pub fn load(config_path: &Path, root: Option<PathBuf>, format: OutputFormat) -> Result<Self> {
        let mut config = EngineConfig::load(config_path)
            .with_context(|| format!("loading config {}", config_path.display()))?;
        if let Some(root) = root {
            config.storage_root = root;
        }
        debug!("Using storage root {:?}", config.storage_root);

        Ok(Self {
            config,
            versions: Arc::new(VersionRegistry::with_builtin_versions()),
            format,
        })
    }

    /// Open the snapshot store, creating the storage root if needed
    pub async fn snapshots(&self) -> Result<SnapshotManager> {
        SnapshotManager::open(self.config.clone())
            .await
            .with_context(|| format!("opening storage root {}", self.config.storage_root.display()))
    }

    pub fn planner(&self) -> MigrationPlanner {
        MigrationPlanner::from_config(self.versions.clone(), &self.config)
    }

    pub async fn executor(&self) -> Result<MigrationExecutor> {
        Ok(MigrationExecutor::with_snapshots(self.snapshots().await?))
    }

    /// Version stamped on freshly written dataset files
    pub fn current_version(&self) -> String {
        self.versions
            .current_version()
            .unwrap_or_else(|| "1.0.0".to_string())
    }
}

/// Read a dataset JSON file
pub async fn read_dataset(path: &Path) -> Result<Dataset> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading dataset {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing dataset {}", path.display()))
}

/// Write a dataset JSON file
pub async fn write_dataset(path: &Path, dataset: &Dataset) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(dataset)?;
    bytes.push(b'\n');
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("writing dataset {}", path.display()))
}
