//! Engine configuration

use crate::error::FsContext;
use crate::planner::BackupPolicy;
use crate::types::SnapshotFormat;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding snapshot payloads and the registry file
    pub storage_root: PathBuf,

    /// Registry file name inside the storage root
    pub registry_file: String,

    /// Format used when a snapshot request does not name one
    pub default_format: SnapshotFormat,

    /// Upper bound for applying a snapshot to a backing store
    pub restore_timeout_secs: u64,

    /// Migration planning configuration
    pub migration: MigrationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_root: crate::default_storage_root(),
            registry_file: "snapshots.json".to_string(),
            default_format: SnapshotFormat::Sql,
            restore_timeout_secs: 300,
            migration: MigrationConfig::default(),
        }
    }
}

/// Migration planning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// When plans demand a backup before executing
    pub backup_policy: BackupPolicy,

    /// Estimated cost of a single migration step
    pub step_cost_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            backup_policy: BackupPolicy::OnBreaking,
            step_cost_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Configuration rooted at a specific storage directory
    pub fn with_storage_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: root.into(),
            ..Default::default()
        }
    }

    /// Load configuration from file, falling back to defaults if it is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).fs_context("read config", path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).fs_context("create config directory", parent)?;
        }
        std::fs::write(path, content).fs_context("write config", path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry_file.trim().is_empty() || self.registry_file.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "registry_file must be a plain file name, got '{}'",
                self.registry_file
            )));
        }
        if self.restore_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "restore_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the registry file path
    pub fn registry_path(&self) -> PathBuf {
        self.storage_root.join(&self.registry_file)
    }

    /// Get the registry lock file path
    pub fn lock_path(&self) -> PathBuf {
        self.storage_root.join(format!("{}.lock", self.registry_file))
    }

    /// Get the directory holding pre-migration backups
    pub fn backups_dir(&self) -> PathBuf {
        self.storage_root.join("backups")
    }

    /// Get the scratch directory for in-flight writes
    pub fn tmp_dir(&self) -> PathBuf {
        self.storage_root.join("tmp")
    }

    pub fn restore_timeout(&self) -> Duration {
        Duration::from_secs(self.restore_timeout_secs)
    }

    pub fn step_cost(&self) -> Duration {
        Duration::from_millis(self.migration.step_cost_ms)
    }
}
