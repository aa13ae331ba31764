//! Dataset versions and the version catalog

use crate::compat::{self, CompatibilityReport};
use crate::migration::{Migration, MigrationRef};
use crate::types::Dataset;
use crate::{Error, Result};
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A `major.minor.patch` dataset version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    /// Accepts an optional leading `v` followed by exactly three numeric parts
    fn from_str(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidVersion {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        if body.is_empty() {
            return Err(invalid("empty version"));
        }

        let parts: Vec<&str> = body.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid("expected major.minor.patch"));
        }

        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid(&format!("'{}' is not a number", part)));
            }
            *slot = part
                .parse()
                .map_err(|_| invalid(&format!("'{}' is out of range", part)))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A registered dataset version.
///
/// `migrations` are the steps that lead *into* this version from the
/// previous registered one.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub version: String,
    pub release_date: NaiveDate,
    pub description: String,
    pub breaking: bool,
    pub migrations: Vec<MigrationRef>,
    pub deprecations: Vec<String>,
}

impl VersionInfo {
    pub fn new(version: impl Into<String>, release_date: NaiveDate, description: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            release_date,
            description: description.into(),
            breaking: false,
            migrations: Vec::new(),
            deprecations: Vec::new(),
        }
    }

    pub fn breaking(mut self) -> Self {
        self.breaking = true;
        self
    }

    pub fn with_migration(mut self, migration: impl Migration + 'static) -> Self {
        self.migrations.push(Arc::new(migration));
        self
    }

    pub fn with_migration_ref(mut self, migration: MigrationRef) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn with_deprecation(mut self, note: impl Into<String>) -> Self {
        self.deprecations.push(note.into());
        self
    }

    pub fn parsed(&self) -> Result<Version> {
        self.version.parse()
    }

    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            version: self.version.clone(),
            release_date: self.release_date,
            description: self.description.clone(),
            breaking: self.breaking,
            migrations: self.migrations.iter().map(|m| m.id().to_string()).collect(),
            deprecations: self.deprecations.clone(),
        }
    }
}

/// Serializable view of a [`VersionInfo`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub version: String,
    pub release_date: NaiveDate,
    pub description: String,
    pub breaking: bool,
    pub migrations: Vec<String>,
    pub deprecations: Vec<String>,
}

/// In-memory catalog of known dataset versions plus the current-version pointer
#[derive(Debug, Default)]
pub struct VersionRegistry {
    versions: RwLock<BTreeMap<Version, VersionInfo>>,
    current: RwLock<Option<Version>>,
}

impl VersionRegistry {
    /// An empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog preloaded with the built-in version chain
    pub fn with_builtin_versions() -> Self {
        let registry = Self::new();
        if let Err(e) = crate::builtin::register_builtin_versions(&registry) {
            warn!("Built-in version chain incomplete: {}", e);
        }
        registry
    }

    /// Insert or replace a version definition
    pub fn register_version(&self, mut info: VersionInfo) -> Result<()> {
        let version = info.parsed()?;
        info.version = version.to_string();

        let replaced = self.versions.write().insert(version, info).is_some();
        if replaced {
            info!("Replaced definition of version {}", version);
        } else {
            debug!("Registered version {}", version);
        }
        Ok(())
    }

    pub fn get_version_info(&self, version: &str) -> Option<VersionInfo> {
        let version: Version = version.parse().ok()?;
        self.versions.read().get(&version).cloned()
    }

    pub fn is_known(&self, version: &str) -> bool {
        self.get_version_info(version).is_some()
    }

    /// All registered versions, ascending
    pub fn available_versions(&self) -> Vec<VersionInfo> {
        self.versions.read().values().cloned().collect()
    }

    /// The explicitly selected version, or the newest registered one
    pub fn current_version(&self) -> Option<String> {
        if let Some(current) = *self.current.read() {
            return Some(current.to_string());
        }
        self.versions.read().keys().next_back().map(Version::to_string)
    }

    pub fn set_current_version(&self, version: &str) -> Result<()> {
        let parsed: Version = version
            .parse()
            .map_err(|_| Error::UnknownVersion(version.to_string()))?;
        if !self.versions.read().contains_key(&parsed) {
            return Err(Error::UnknownVersion(version.to_string()));
        }

        *self.current.write() = Some(parsed);
        info!("Current dataset version set to {}", parsed);
        Ok(())
    }

    /// Whether a dataset's declared version is registered
    pub fn validate_data_version(&self, dataset: &Dataset) -> bool {
        self.is_known(dataset.version())
    }

    /// Compare two versions using this catalog's breaking-change notes
    pub fn check_compatibility(&self, current: &str, required: &str) -> CompatibilityReport {
        compat::check_compatibility(current, required, &self.available_versions())
    }
}
