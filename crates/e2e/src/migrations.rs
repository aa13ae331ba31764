//! Scripted migrations for execution scenarios
//!
//! A [`ScriptedMigration`] stamps the records of one table with a marker
//! field and can be told to fail on migrate or rollback. Every invocation is
//! recorded in a shared [`CallLog`].

use chrono::NaiveDate;
use fieldcheck_engine::{Dataset, Migration, MigrationError, VersionInfo, VersionRegistry};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Ordered record of migrate/rollback invocations
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedMigration {
    id: String,
    from: String,
    to: String,
    table: String,
    fail_migrate: bool,
    fail_rollback: bool,
    reversible: bool,
    log: CallLog,
}

impl ScriptedMigration {
    pub fn new(from: &str, to: &str, log: &CallLog) -> Self {
        Self {
            id: format!("{}-to-{}", from, to),
            from: from.to_string(),
            to: to.to_string(),
            table: "tickets".to_string(),
            fail_migrate: false,
            fail_rollback: false,
            reversible: true,
            log: log.clone(),
        }
    }

    pub fn on_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_migrate = true;
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    pub fn irreversible(mut self) -> Self {
        self.reversible = false;
        self
    }

    fn marker(&self) -> String {
        format!("migrated_{}", self.to.replace('.', "_"))
    }
}

impl Migration for ScriptedMigration {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn from_version(&self) -> &str {
        &self.from
    }

    fn to_version(&self) -> &str {
        &self.to
    }

    fn migrate(&self, dataset: &Dataset) -> Result<Dataset, MigrationError> {
        self.log.push(format!("migrate:{}", self.id));
        if self.fail_migrate {
            return Err(MigrationError::new(format!("scripted failure in {}", self.id)));
        }
        let mut next = dataset.clone();
        if let Some(records) = next.table_mut(&self.table) {
            for record in records.iter_mut().filter_map(Value::as_object_mut) {
                record.insert(self.marker(), Value::Bool(true));
            }
        }
        Ok(next)
    }

    fn can_rollback(&self) -> bool {
        self.reversible
    }

    fn rollback(&self, dataset: &Dataset) -> Result<Dataset, MigrationError> {
        self.log.push(format!("rollback:{}", self.id));
        if self.fail_rollback || !self.reversible {
            return Err(MigrationError::new(format!("cannot roll back {}", self.id)));
        }
        let mut previous = dataset.clone();
        if let Some(records) = previous.table_mut(&self.table) {
            for record in records.iter_mut().filter_map(Value::as_object_mut) {
                record.remove(&self.marker());
            }
        }
        Ok(previous)
    }
}

/// A linear version chain where every version after the first carries the
/// migration from its predecessor. Versions whose major component changes
/// are marked breaking.
pub fn scripted_chain(
    versions: &[&str],
    mut configure: impl FnMut(ScriptedMigration) -> ScriptedMigration,
    log: &CallLog,
) -> VersionRegistry {
    let registry = VersionRegistry::new();
    let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default();

    if let Some(first) = versions.first() {
        let _ = registry.register_version(VersionInfo::new(*first, date, "baseline"));
    }
    for pair in versions.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let mut info = VersionInfo::new(to, date, format!("scripted {}", to))
            .with_migration(configure(ScriptedMigration::new(from, to, log)));
        if major(from) != major(to) {
            info = info.breaking();
        }
        let _ = registry.register_version(info);
    }
    registry
}

fn major(version: &str) -> &str {
    version.trim_start_matches('v').split('.').next().unwrap_or("")
}
