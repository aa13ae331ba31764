//! Migration steps between adjacent dataset versions

use crate::error::MigrationError;
use crate::types::Dataset;
use std::fmt;
use std::sync::Arc;

/// A single forward transformation between two adjacent versions.
///
/// Implementations are pure, synchronous transforms over an in-memory
/// dataset. Rollback is optional: a migration that cannot be undone reports
/// `can_rollback() == false`, and executors treat the missing rollback as a
/// warning rather than an error.
pub trait Migration: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn from_version(&self) -> &str;

    fn to_version(&self) -> &str;

    fn migrate(&self, dataset: &Dataset) -> Result<Dataset, MigrationError>;

    fn can_rollback(&self) -> bool {
        false
    }

    fn rollback(&self, _dataset: &Dataset) -> Result<Dataset, MigrationError> {
        Err(MigrationError::new(format!(
            "migration {} does not support rollback",
            self.id()
        )))
    }
}

/// Shared handle to a registered migration
pub type MigrationRef = Arc<dyn Migration>;

impl fmt::Debug for dyn Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id())
            .field("from", &self.from_version())
            .field("to", &self.to_version())
            .field("can_rollback", &self.can_rollback())
            .finish()
    }
}
