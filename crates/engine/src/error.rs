//! Error types for the fieldcheck engine

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to {op} {}: {source}", path.display())]
    Fs {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot not found: {id}")]
    SnapshotNotFound { id: String },

    #[error("Checksum mismatch for snapshot {id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Snapshot registry is corrupted: {0}")]
    RegistryCorruption(String),

    #[error("Unknown version: {0}")]
    UnknownVersion(String),

    #[error("Invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },

    #[error("Migration {id} failed: {reason}")]
    MigrationFailure { id: String, reason: String },

    #[error("Rollback of migration {id} failed: {reason}")]
    RollbackFailure { id: String, reason: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Backing store error: {0}")]
    BackingStore(String),

    #[error("Restore validation failed: {0}")]
    RestoreValidation(String),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Operation timeout: {operation} exceeded {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this error came from the file system (wrapped or bare)
    pub fn is_fs(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Fs { .. })
    }
}

/// Attach the failing operation and path to an io::Error
pub(crate) trait FsContext<T> {
    fn fs_context(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T> FsContext<T> for std::result::Result<T, std::io::Error> {
    fn fs_context(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| Error::Fs {
            op,
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Failure raised by a migration or rollback function
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct MigrationError(pub String);

impl MigrationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for MigrationError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for MigrationError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}
