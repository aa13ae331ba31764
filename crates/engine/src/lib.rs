//! Fieldcheck Engine
//!
//! Snapshot and data-version migration engine for field-service dispatch
//! test fixtures:
//! - checksummed SQL/JSON snapshots of test datasets, tracked in a
//!   per-storage-root registry
//! - a catalog of dataset versions with their migrations
//! - migration planning, execution with backup and rollback, and
//!   compatibility checks

pub mod builtin;
pub mod codec;
pub mod compat;
pub mod config;
pub mod error;
pub mod executor;
pub mod migration;
pub mod planner;
pub mod registry;
pub mod snapshot;
pub mod types;
pub mod version;

// Re-export commonly used types
pub use compat::{check_compatibility, CompatibilityReport};
pub use config::EngineConfig;
pub use error::{Error, MigrationError, Result};
pub use executor::{ExecuteOptions, MigrationExecutor, MigrationResult};
pub use migration::{Migration, MigrationRef};
pub use planner::{BackupPolicy, MigrationPlan, MigrationPlanner, PlanStep, StepDirection};
pub use registry::SnapshotRegistry;
pub use snapshot::{
    BackingStore, CreateSnapshotOptions, ImportOptions, RestoreOptions, SnapshotManager,
};
pub use types::*;
pub use version::{Version, VersionInfo, VersionRegistry};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default fieldcheck home directory
pub fn default_home() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".fieldcheck")
}

/// Default snapshot storage root
pub fn default_storage_root() -> std::path::PathBuf {
    default_home().join("snapshots")
}

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    default_home().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
