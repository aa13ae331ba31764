//! Snapshot manager
//!
//! Creates, restores, imports, exports, lists and validates dataset snapshots
//! for one storage root. Payload files are written into a scratch directory
//! first and moved into place while the registry lock is held, so a registry
//! record never points at a partial file and a failed registry write leaves
//! no payload behind.

use crate::codec;
use crate::config::EngineConfig;
use crate::error::FsContext;
use crate::registry::SnapshotRegistry;
use crate::types::{Dataset, Snapshot, SnapshotFormat, SnapshotMetadata, Tables};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// External system a snapshot is restored into
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Apply a serialized snapshot payload
    async fn apply(&self, payload: &[u8], format: SnapshotFormat) -> Result<()>;

    /// Remove all existing data before a restore
    async fn drop_all(&self) -> Result<()>;

    /// Row count per table, used to validate a completed restore
    async fn row_counts(&self) -> Result<BTreeMap<String, usize>>;
}

/// Options for [`SnapshotManager::create_snapshot`]
#[derive(Debug, Clone, Default)]
pub struct CreateSnapshotOptions {
    pub name: String,
    pub description: Option<String>,
    /// Falls back to the configured default format when unset
    pub format: Option<SnapshotFormat>,
    pub tags: Vec<String>,
    /// Empty means every table
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
}

impl CreateSnapshotOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_format(mut self, format: SnapshotFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn include(mut self, table: impl Into<String>) -> Self {
        self.include_tables.push(table.into());
        self
    }

    pub fn exclude(mut self, table: impl Into<String>) -> Self {
        self.exclude_tables.push(table.into());
        self
    }
}

/// Options for [`SnapshotManager::restore_snapshot`]
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub drop_existing: bool,
    pub validate_after_restore: bool,
    /// Falls back to the configured restore timeout when unset
    pub timeout: Option<Duration>,
}

/// Options for [`SnapshotManager::import_snapshot`]
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub name: String,
    pub description: Option<String>,
    /// Inferred from the file extension when unset
    pub format: Option<SnapshotFormat>,
    pub tags: Vec<String>,
}

/// Integrity state of one registered snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub id: String,
    pub name: String,
    pub valid: bool,
}

/// Orphan collection statistics
#[derive(Debug, Default)]
pub struct GcStats {
    pub scanned_files: usize,
    pub removed_files: usize,
    pub removed_bytes: u64,
}

#[derive(Serialize)]
struct BackupPayload<'a> {
    version: &'a str,
    timestamp: DateTime<Utc>,
    tables: Vec<&'a str>,
    data: &'a Tables,
}

/// Snapshot manager for one storage root
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    config: EngineConfig,
    registry: SnapshotRegistry,
}

impl SnapshotManager {
    /// Open the storage root described by the configuration, creating it if needed
    ///
    /// The root is canonicalized, so every recorded payload path is absolute
    /// and independent of the working directory.
    pub async fn open(mut config: EngineConfig) -> Result<Self> {
        config.validate()?;

        fs::create_dir_all(&config.storage_root)
            .await
            .fs_context("create storage directory", &config.storage_root)?;
        config.storage_root = fs::canonicalize(&config.storage_root)
            .await
            .fs_context("resolve storage root", &config.storage_root)?;

        for dir in [config.backups_dir(), config.tmp_dir()] {
            fs::create_dir_all(&dir)
                .await
                .fs_context("create storage directory", &dir)?;
        }

        let registry = SnapshotRegistry::new(config.registry_path(), config.lock_path());
        info!("Opened snapshot store at {:?}", config.storage_root);

        Ok(Self { config, registry })
    }

    /// Open a storage root with default settings
    pub async fn open_root(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open(EngineConfig::with_storage_root(root)).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage_root(&self) -> &Path {
        &self.config.storage_root
    }

    pub fn registry(&self) -> &SnapshotRegistry {
        &self.registry
    }

    /// Serialize a dataset and register it as a new snapshot
    pub async fn create_snapshot(
        &self,
        dataset: &Dataset,
        options: CreateSnapshotOptions,
    ) -> Result<Snapshot> {
        if options.name.trim().is_empty() {
            return Err(Error::InvalidOptions("snapshot name must not be empty".to_string()));
        }

        let format = options.format.unwrap_or(self.config.default_format);
        let tables = codec::select_tables(
            &dataset.tables,
            &options.include_tables,
            &options.exclude_tables,
        );
        let payload = codec::encode(&tables, format)?;

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let file_name = format!(
            "{}-{}-{}.{}",
            sanitize_name(&options.name),
            created_at.format("%Y%m%dT%H%M%S%3fZ"),
            &id[..8],
            format.extension()
        );

        let snapshot = Snapshot {
            id,
            name: options.name,
            format,
            file_path: self.config.storage_root.join(file_name),
            size: payload.len() as u64,
            checksum: codec::checksum(&payload),
            created_at,
            metadata: SnapshotMetadata {
                description: options.description.unwrap_or_default(),
                tags: options.tags,
                tables: tables.keys().cloned().collect(),
            },
        };

        let snapshot = self.commit(&payload, snapshot).await?;
        info!(
            "Created snapshot '{}' ({}, {} bytes, {} tables)",
            snapshot.name,
            snapshot.id,
            snapshot.size,
            snapshot.metadata.tables.len()
        );
        Ok(snapshot)
    }

    /// Verify and apply a snapshot to a backing store
    pub async fn restore_snapshot(
        &self,
        id: &str,
        store: &dyn BackingStore,
        options: RestoreOptions,
    ) -> Result<()> {
        let timeout = options.timeout.unwrap_or_else(|| self.config.restore_timeout());
        if timeout.is_zero() {
            return Err(Error::InvalidOptions("restore timeout must be non-zero".to_string()));
        }

        let snapshot = self
            .get_snapshot(id)
            .await?
            .ok_or_else(|| Error::SnapshotNotFound { id: id.to_string() })?;

        let payload = match fs::read(&snapshot.file_path).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ChecksumMismatch {
                    id: snapshot.id,
                    expected: snapshot.checksum,
                    actual: "<missing file>".to_string(),
                });
            }
            Err(e) => return Err(e).fs_context("read snapshot", &snapshot.file_path),
        };

        let actual = codec::checksum(&payload);
        if actual != snapshot.checksum {
            warn!("Refusing to restore corrupted snapshot {}", snapshot.id);
            return Err(Error::ChecksumMismatch {
                id: snapshot.id,
                expected: snapshot.checksum,
                actual,
            });
        }

        // Row counts are only needed for validation; the store gets raw bytes.
        let expected = if options.validate_after_restore {
            Some(codec::decode(&payload, snapshot.format)?)
        } else {
            None
        };

        let apply = async {
            if options.drop_existing {
                store.drop_all().await?;
            }
            store.apply(&payload, snapshot.format).await?;
            if let Some(tables) = &expected {
                validate_row_counts(store, tables).await?;
            }
            Ok::<(), Error>(())
        };

        match tokio::time::timeout(timeout, apply).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Timeout {
                    operation: format!("restore snapshot {}", snapshot.id),
                    millis: timeout.as_millis() as u64,
                })
            }
        }

        info!("Restored snapshot '{}' ({})", snapshot.name, snapshot.id);
        Ok(())
    }

    /// List all snapshots, oldest first.
    ///
    /// A corrupted registry is logged and reported as empty.
    pub async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = match self.registry.load().await {
            Ok(snapshots) => snapshots,
            Err(Error::RegistryCorruption(reason)) => {
                warn!("Snapshot registry unreadable, treating as empty: {}", reason);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(snapshots)
    }

    pub async fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        Ok(self.list_snapshots().await?.into_iter().find(|s| s.id == id))
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Vec<Snapshot>> {
        Ok(self
            .list_snapshots()
            .await?
            .into_iter()
            .filter(|s| s.name == name)
            .collect())
    }

    pub async fn find_by_tag(&self, tag: &str) -> Result<Vec<Snapshot>> {
        Ok(self
            .list_snapshots()
            .await?
            .into_iter()
            .filter(|s| s.has_tag(tag))
            .collect())
    }

    /// Remove a snapshot's registry entry and payload file
    pub async fn delete_snapshot(&self, id: &str) -> Result<()> {
        let snapshot = self
            .registry
            .remove(id)
            .await?
            .ok_or_else(|| Error::SnapshotNotFound { id: id.to_string() })?;

        match fs::remove_file(&snapshot.file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Payload for snapshot {} already gone", snapshot.id);
            }
            Err(e) => return Err(e).fs_context("delete snapshot file", &snapshot.file_path),
        }

        info!("Deleted snapshot '{}' ({})", snapshot.name, snapshot.id);
        Ok(())
    }

    /// Register an externally produced payload file as a snapshot.
    ///
    /// The bytes are copied as-is into the storage root; the checksum covers
    /// them as they are at import time.
    pub async fn import_snapshot(
        &self,
        file_path: impl AsRef<Path>,
        options: ImportOptions,
    ) -> Result<Snapshot> {
        let source = file_path.as_ref();
        if options.name.trim().is_empty() {
            return Err(Error::InvalidOptions("snapshot name must not be empty".to_string()));
        }

        let format = options.format.unwrap_or_else(|| {
            match source.extension().and_then(|e| e.to_str()) {
                Some(ext) => SnapshotFormat::parse_lenient(ext),
                None => SnapshotFormat::Sql,
            }
        });

        let payload = fs::read(source).await.fs_context("read import", source)?;
        let tables: Vec<String> = match codec::decode(&payload, format) {
            Ok(tables) => tables.into_keys().collect(),
            Err(e) => {
                debug!("Import {:?} is opaque to the {} codec: {}", source, format, e);
                Vec::new()
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let file_name = format!(
            "{}-{}-{}.{}",
            sanitize_name(&options.name),
            created_at.format("%Y%m%dT%H%M%S%3fZ"),
            &id[..8],
            format.extension()
        );

        let snapshot = Snapshot {
            id,
            name: options.name,
            format,
            file_path: self.config.storage_root.join(file_name),
            size: payload.len() as u64,
            checksum: codec::checksum(&payload),
            created_at,
            metadata: SnapshotMetadata {
                description: options.description.unwrap_or_default(),
                tags: options.tags,
                tables,
            },
        };

        let snapshot = self.commit(&payload, snapshot).await?;
        info!(
            "Imported snapshot '{}' ({}) from {:?}",
            snapshot.name, snapshot.id, source
        );
        Ok(snapshot)
    }

    /// Copy a snapshot's payload file byte for byte
    pub async fn export_snapshot(&self, id: &str, destination: impl AsRef<Path>) -> Result<()> {
        let destination = destination.as_ref();
        let snapshot = self
            .get_snapshot(id)
            .await?
            .ok_or_else(|| Error::SnapshotNotFound { id: id.to_string() })?;

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .fs_context("create export directory", parent)?;
        }
        fs::copy(&snapshot.file_path, destination)
            .await
            .fs_context("export snapshot", &snapshot.file_path)?;

        debug!("Exported snapshot {} to {:?}", snapshot.id, destination);
        Ok(())
    }

    /// Recompute the payload checksum and compare it with the stored one.
    ///
    /// A missing or unreadable file is reported as invalid.
    pub async fn validate_snapshot_integrity(&self, snapshot: &Snapshot) -> bool {
        match codec::checksum_file(&snapshot.file_path).await {
            Ok(actual) if actual == snapshot.checksum => true,
            Ok(actual) => {
                warn!(
                    "Snapshot {} checksum mismatch: expected {}, got {}",
                    snapshot.id, snapshot.checksum, actual
                );
                false
            }
            Err(e) => {
                warn!("Snapshot {} cannot be verified: {}", snapshot.id, e);
                false
            }
        }
    }

    /// Validate every registered snapshot
    pub async fn verify_all(&self) -> Result<Vec<IntegrityReport>> {
        let mut reports = Vec::new();
        for snapshot in self.list_snapshots().await? {
            let valid = self.validate_snapshot_integrity(&snapshot).await;
            reports.push(IntegrityReport {
                id: snapshot.id,
                name: snapshot.name,
                valid,
            });
        }
        Ok(reports)
    }

    /// Delete all but the newest `keep_latest` snapshots, optionally limited
    /// to those carrying a tag. Returns the deleted records.
    pub async fn prune(&self, keep_latest: usize, tag: Option<&str>) -> Result<Vec<Snapshot>> {
        let mut candidates: Vec<Snapshot> = self
            .list_snapshots()
            .await?
            .into_iter()
            .filter(|s| tag.map_or(true, |t| s.has_tag(t)))
            .collect();
        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut deleted = Vec::new();
        for snapshot in candidates.into_iter().skip(keep_latest) {
            match self.delete_snapshot(&snapshot.id).await {
                Ok(()) => deleted.push(snapshot),
                Err(Error::SnapshotNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        info!("Pruned {} snapshot(s)", deleted.len());
        Ok(deleted)
    }

    /// Write a pre-migration backup of a dataset and register it.
    ///
    /// The file lands at `backups/backup-<version>-<timestamp>.json` and holds
    /// `{version, timestamp, tables, data}`, which also restores as a JSON
    /// snapshot.
    pub async fn create_backup(&self, dataset: &Dataset, from_version: &str) -> Result<Snapshot> {
        let timestamp = Utc::now();
        let payload = BackupPayload {
            version: from_version,
            timestamp,
            tables: dataset.tables.keys().map(String::as_str).collect(),
            data: &dataset.tables,
        };
        let mut bytes = serde_json::to_vec_pretty(&payload)?;
        bytes.push(b'\n');

        let file_name = format!(
            "backup-{}-{}.json",
            sanitize_name(from_version),
            timestamp.format("%Y%m%dT%H%M%S%.9fZ")
        );

        let snapshot = Snapshot {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("backup-{}", from_version),
            format: SnapshotFormat::Json,
            file_path: self.config.backups_dir().join(file_name),
            size: bytes.len() as u64,
            checksum: codec::checksum(&bytes),
            created_at: timestamp,
            metadata: SnapshotMetadata {
                description: format!("Pre-migration backup of dataset at version {}", from_version),
                tags: vec!["backup".to_string(), from_version.to_string()],
                tables: dataset.table_names(),
            },
        };

        let snapshot = self.commit(&bytes, snapshot).await?;
        info!("Backed up dataset at {} to {:?}", from_version, snapshot.file_path);
        Ok(snapshot)
    }

    /// Remove payload files no registry record references
    pub async fn collect_orphans(&self) -> Result<GcStats> {
        let mut stats = GcStats::default();
        let _lock = self.registry.lock().await?;

        // Records written before the root was canonicalized may hold relative
        // paths. When those cannot be resolved, their file names are kept.
        let mut referenced: HashSet<PathBuf> = HashSet::new();
        let mut unresolved_names: HashSet<std::ffi::OsString> = HashSet::new();
        for snapshot in self.registry.load().await? {
            match fs::canonicalize(&snapshot.file_path).await {
                Ok(path) => {
                    referenced.insert(path);
                }
                Err(_) => {
                    if let Some(name) = snapshot.file_path.file_name() {
                        unresolved_names.insert(name.to_os_string());
                    }
                }
            }
        }
        let tmp_dir = self.config.tmp_dir();

        for entry in walkdir::WalkDir::new(&self.config.storage_root)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.starts_with(&tmp_dir)
                || path == self.registry.path()
                || entry.file_name().to_string_lossy().starts_with('.')
            {
                continue;
            }
            if !matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("sql") | Some("json")
            ) {
                continue;
            }

            stats.scanned_files += 1;
            let canonical = fs::canonicalize(path).await.unwrap_or_else(|_| path.to_path_buf());
            if referenced.contains(&canonical) || unresolved_names.contains(entry.file_name()) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(path).await {
                Ok(()) => {
                    stats.removed_files += 1;
                    stats.removed_bytes += size;
                }
                Err(e) => warn!("Failed to remove orphaned payload {:?}: {}", path, e),
            }
        }

        info!(
            "Orphan collection complete: removed {}/{} files ({} bytes freed)",
            stats.removed_files, stats.scanned_files, stats.removed_bytes
        );
        Ok(stats)
    }

    /// Stage a payload and publish it together with its registry record
    async fn commit(&self, payload: &[u8], snapshot: Snapshot) -> Result<Snapshot> {
        let tmp_path = self.config.tmp_dir().join(format!("{}.tmp", snapshot.id));
        fs::write(&tmp_path, payload)
            .await
            .fs_context("write snapshot", &tmp_path)?;

        let final_path = snapshot.file_path.clone();
        let record = snapshot.clone();
        let published = self
            .registry
            .update(|records| {
                std::fs::rename(&tmp_path, &final_path)
                    .fs_context("publish snapshot", &final_path)?;
                records.push(record);
                Ok(())
            })
            .await;

        if let Err(e) = published {
            let _ = fs::remove_file(&tmp_path).await;
            let _ = fs::remove_file(&final_path).await;
            return Err(e);
        }

        Ok(snapshot)
    }
}

async fn validate_row_counts(store: &dyn BackingStore, tables: &Tables) -> Result<()> {
    let counts = store.row_counts().await?;
    for (table, records) in tables {
        let actual = counts.get(table).copied().unwrap_or(0);
        if actual != records.len() {
            return Err(Error::RestoreValidation(format!(
                "table '{}' has {} rows, expected {}",
                table,
                actual,
                records.len()
            )));
        }
    }
    Ok(())
}

/// File-name-safe form of a snapshot name
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '.').to_string();
    if cleaned.is_empty() {
        "snapshot".to_string()
    } else {
        cleaned
    }
}
