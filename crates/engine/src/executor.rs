//! Migration execution
//!
//! Steps run sequentially: each migration's output is the next one's input.
//! Domain failures (a migration or rollback that fails, a backup that cannot
//! be written) are reported in the returned [`MigrationResult`]; only invalid
//! options are returned as errors.

use crate::error::MigrationError;
use crate::planner::{MigrationPlan, PlanStep, StepDirection};
use crate::snapshot::SnapshotManager;
use crate::types::Dataset;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Options for [`MigrationExecutor::execute_migration`]
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Validate the plan without invoking any migration
    pub dry_run: bool,
    /// Back up the dataset even when the plan does not require it
    pub create_backup: bool,
    /// Checked between steps; a breach fails the run like a migration error
    pub timeout: Option<Duration>,
}

/// Outcome of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub success: bool,
    pub from_version: String,
    pub to_version: String,
    pub applied_migrations: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duration: Duration,
    pub backup_path: Option<PathBuf>,
}

impl MigrationResult {
    fn new(plan: &MigrationPlan) -> Self {
        Self {
            success: false,
            from_version: plan.from_version.clone(),
            to_version: plan.to_version.clone(),
            applied_migrations: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            duration: Duration::ZERO,
            backup_path: None,
        }
    }

    fn finish(mut self, success: bool, started: Instant) -> Self {
        self.success = success;
        self.duration = started.elapsed();
        self
    }
}

/// Applies migration plans to datasets
#[derive(Debug, Clone, Default)]
pub struct MigrationExecutor {
    snapshots: Option<SnapshotManager>,
}

impl MigrationExecutor {
    /// An executor without backup support
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor that writes backups through the given snapshot manager
    pub fn with_snapshots(snapshots: SnapshotManager) -> Self {
        Self {
            snapshots: Some(snapshots),
        }
    }

    /// Execute a plan against a dataset.
    ///
    /// The dataset is replaced with the migrated result only on success; on
    /// failure it keeps its pre-migration value and the result describes what
    /// was applied and rolled back.
    pub async fn execute_migration(
        &self,
        dataset: &mut Dataset,
        plan: &MigrationPlan,
        options: ExecuteOptions,
    ) -> Result<MigrationResult> {
        if options.timeout.map_or(false, |t| t.is_zero()) {
            return Err(Error::InvalidOptions(
                "migration timeout must be non-zero".to_string(),
            ));
        }

        let started = Instant::now();
        let mut result = MigrationResult::new(plan);

        if dataset.version() != plan.from_version {
            result.errors.push(format!(
                "Dataset is at version {} but the plan starts at {}",
                dataset.version(),
                plan.from_version
            ));
            return Ok(result.finish(false, started));
        }

        if !plan.is_executable() {
            if plan.gaps.is_empty() {
                result
                    .errors
                    .push("Plan contains no migrations".to_string());
            } else {
                result.errors.extend(plan.gaps.iter().cloned());
            }
            warn!(
                "Plan {} -> {} is not executable",
                plan.from_version, plan.to_version
            );
            return Ok(result.finish(false, started));
        }

        if options.dry_run {
            result.warnings.push(format!(
                "Dry run: {} migration(s) would be applied",
                plan.migrations.len()
            ));
            return Ok(result.finish(true, started));
        }

        if plan.is_noop() {
            return Ok(result.finish(true, started));
        }

        if options.create_backup || plan.backup_required {
            let backup = match &self.snapshots {
                Some(snapshots) => snapshots
                    .create_backup(dataset, &plan.from_version)
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("no snapshot manager configured".to_string()),
            };
            match backup {
                Ok(snapshot) => result.backup_path = Some(snapshot.file_path),
                Err(reason) => {
                    error!("Aborting migration, backup failed: {}", reason);
                    result.errors.push(Error::Backup(reason).to_string());
                    return Ok(result.finish(false, started));
                }
            }
        }

        let mut working = dataset.clone();
        let mut applied: Vec<&PlanStep> = Vec::new();
        let mut failure: Option<Error> = None;

        for step in &plan.migrations {
            if let Some(timeout) = options.timeout {
                if started.elapsed() > timeout {
                    failure = Some(Error::Timeout {
                        operation: format!("migration before step {}", step.id()),
                        millis: timeout.as_millis() as u64,
                    });
                    break;
                }
            }

            match apply(step, &working) {
                Ok(mut next) => {
                    next.metadata.version = step.target_version().to_string();
                    working = next;
                    applied.push(step);
                    result.applied_migrations.push(step.id().to_string());
                    debug!("Applied migration {} -> {}", step.id(), step.target_version());
                }
                Err(e) => {
                    failure = Some(Error::MigrationFailure {
                        id: step.id().to_string(),
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }

        let Some(failure) = failure else {
            *dataset = working;
            info!(
                "Migrated dataset {} -> {} ({} step(s))",
                plan.from_version,
                plan.to_version,
                result.applied_migrations.len()
            );
            return Ok(result.finish(true, started));
        };

        error!("{}", failure);
        result.errors.push(failure.to_string());

        for step in applied.into_iter().rev() {
            if !can_undo(step) {
                let note = format!(
                    "Migration {} has no rollback; its changes were not undone",
                    step.id()
                );
                warn!("{}", note);
                result.warnings.push(note);
                continue;
            }

            match undo(step, &working) {
                Ok(mut previous) => {
                    previous.metadata.version = step.source_version().to_string();
                    working = previous;
                    result
                        .warnings
                        .push(format!("Rolled back migration {}", step.id()));
                }
                Err(e) => {
                    let rollback = Error::RollbackFailure {
                        id: step.id().to_string(),
                        reason: e.to_string(),
                    };
                    error!("{}", rollback);
                    result
                        .errors
                        .push(format!("{} (rollback stopped; earlier steps not undone)", rollback));
                    break;
                }
            }
        }

        Ok(result.finish(false, started))
    }
}

fn apply(step: &PlanStep, dataset: &Dataset) -> std::result::Result<Dataset, MigrationError> {
    match step.direction {
        StepDirection::Forward => step.migration.migrate(dataset),
        StepDirection::Reverse => step.migration.rollback(dataset),
    }
}

fn can_undo(step: &PlanStep) -> bool {
    match step.direction {
        StepDirection::Forward => step.migration.can_rollback(),
        StepDirection::Reverse => true,
    }
}

fn undo(step: &PlanStep, dataset: &Dataset) -> std::result::Result<Dataset, MigrationError> {
    match step.direction {
        StepDirection::Forward => step.migration.rollback(dataset),
        StepDirection::Reverse => step.migration.migrate(dataset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::Migration;
    use crate::planner::MigrationPlanner;
    use crate::version::{VersionInfo, VersionRegistry};
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Appends its id to a `trail` table; optionally fails
    struct Trail {
        id: &'static str,
        from: &'static str,
        to: &'static str,
        fail_migrate: bool,
        fail_rollback: bool,
        reversible: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Migration for Trail {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            self.id
        }
        fn from_version(&self) -> &str {
            self.from
        }
        fn to_version(&self) -> &str {
            self.to
        }
        fn migrate(&self, dataset: &Dataset) -> std::result::Result<Dataset, MigrationError> {
            self.calls.lock().push(format!("migrate:{}", self.id));
            if self.fail_migrate {
                return Err(MigrationError::new("column type conflict"));
            }
            let mut next = dataset.clone();
            next.tables
                .entry("trail".to_string())
                .or_default()
                .push(json!({"step": self.id}));
            Ok(next)
        }
        fn can_rollback(&self) -> bool {
            self.reversible
        }
        fn rollback(&self, dataset: &Dataset) -> std::result::Result<Dataset, MigrationError> {
            self.calls.lock().push(format!("rollback:{}", self.id));
            if self.fail_rollback {
                return Err(MigrationError::new("rollback exploded"));
            }
            let mut previous = dataset.clone();
            if let Some(trail) = previous.table_mut("trail") {
                trail.pop();
            }
            Ok(previous)
        }
    }

    struct Fixture {
        planner: MigrationPlanner,
        calls: Arc<Mutex<Vec<String>>>,
    }

    /// Versions 1.0.0 -> 1.1.0 -> 1.2.0 -> 2.0.0 (breaking)
    fn fixture(fail: &str, fail_rollback: &str, irreversible: &str) -> Fixture {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let registry = VersionRegistry::new();
        registry
            .register_version(VersionInfo::new("1.0.0", date, ""))
            .unwrap();
        let chain = [
            ("m1", "1.0.0", "1.1.0"),
            ("m2", "1.1.0", "1.2.0"),
            ("m3", "1.2.0", "2.0.0"),
        ];
        for (id, from, to) in chain {
            let mut info = VersionInfo::new(to, date, "").with_migration(Trail {
                id,
                from,
                to,
                fail_migrate: id == fail,
                fail_rollback: id == fail_rollback,
                reversible: id != irreversible,
                calls: calls.clone(),
            });
            if to == "2.0.0" {
                info = info.breaking();
            }
            registry.register_version(info).unwrap();
        }

        Fixture {
            planner: MigrationPlanner::new(Arc::new(registry)),
            calls,
        }
    }

    #[tokio::test]
    async fn test_successful_run() {
        let fx = fixture("", "", "");
        let plan = fx.planner.create_migration_plan("1.0.0", "1.2.0");
        let mut dataset = Dataset::new("1.0.0");

        let result = MigrationExecutor::new()
            .execute_migration(&mut dataset, &plan, ExecuteOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.applied_migrations, vec!["m1", "m2"]);
        assert_eq!(dataset.version(), "1.2.0");
        assert_eq!(dataset.table("trail").unwrap().len(), 2);
        assert!(result.backup_path.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_invokes_nothing() {
        let fx = fixture("", "", "");
        let plan = fx.planner.create_migration_plan("1.0.0", "2.0.0");
        let mut dataset = Dataset::new("1.0.0");
        let before = dataset.clone();

        let result = MigrationExecutor::new()
            .execute_migration(
                &mut dataset,
                &plan,
                ExecuteOptions {
                    dry_run: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.applied_migrations.is_empty());
        assert!(fx.calls.lock().is_empty());
        assert_eq!(dataset, before);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_reverse() {
        let fx = fixture("m3", "", "");
        let plan = MigrationPlan {
            backup_required: false,
            ..fx.planner.create_migration_plan("1.0.0", "2.0.0")
        };
        let mut dataset = Dataset::new("1.0.0");
        let before = dataset.clone();

        let result = MigrationExecutor::new()
            .execute_migration(&mut dataset, &plan, ExecuteOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.applied_migrations, vec!["m1", "m2"]);
        assert!(result.errors[0].contains("Migration m3 failed"));
        assert_eq!(
            result.warnings,
            vec!["Rolled back migration m2", "Rolled back migration m1"]
        );
        assert_eq!(
            *fx.calls.lock(),
            vec!["migrate:m1", "migrate:m2", "migrate:m3", "rollback:m2", "rollback:m1"]
        );
        assert_eq!(dataset, before);
    }

    #[tokio::test]
    async fn test_missing_rollback_is_a_warning() {
        let fx = fixture("m3", "", "m1");
        let plan = MigrationPlan {
            backup_required: false,
            ..fx.planner.create_migration_plan("1.0.0", "2.0.0")
        };
        let mut dataset = Dataset::new("1.0.0");

        let result = MigrationExecutor::new()
            .execute_migration(&mut dataset, &plan, ExecuteOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.warnings.contains(&"Rolled back migration m2".to_string()));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("m1 has no rollback")));
    }

    #[tokio::test]
    async fn test_rollback_failure_stops_rollback() {
        let fx = fixture("m3", "m2", "");
        let plan = MigrationPlan {
            backup_required: false,
            ..fx.planner.create_migration_plan("1.0.0", "2.0.0")
        };
        let mut dataset = Dataset::new("1.0.0");

        let result = MigrationExecutor::new()
            .execute_migration(&mut dataset, &plan, ExecuteOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("Migration m3 failed"));
        assert!(result.errors[1].contains("Rollback of migration m2 failed"));
        assert!(!fx.calls.lock().contains(&"rollback:m1".to_string()));
    }

    #[tokio::test]
    async fn test_required_backup_without_manager_aborts() {
        let fx = fixture("", "", "");
        let plan = fx.planner.create_migration_plan("1.0.0", "2.0.0");
        assert!(plan.backup_required);
        let mut dataset = Dataset::new("1.0.0");

        let result = MigrationExecutor::new()
            .execute_migration(&mut dataset, &plan, ExecuteOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.errors[0].starts_with("Backup failed"));
        assert!(fx.calls.lock().is_empty());
        assert_eq!(dataset.version(), "1.0.0");
    }

    #[tokio::test]
    async fn test_backup_written_before_breaking_upgrade() {
        let tmp = TempDir::new().unwrap();
        let snapshots = SnapshotManager::open_root(tmp.path()).await.unwrap();
        let fx = fixture("", "", "");
        let plan = fx.planner.create_migration_plan("1.0.0", "2.0.0");
        let mut dataset = Dataset::new("1.0.0").with_table("customers", vec![json!({"id": 1})]);

        let result = MigrationExecutor::with_snapshots(snapshots.clone())
            .execute_migration(&mut dataset, &plan, ExecuteOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        let backup_path = result.backup_path.unwrap();
        assert!(backup_path.exists());
        assert_eq!(snapshots.find_by_tag("backup").await.unwrap().len(), 1);
        assert_eq!(dataset.version(), "2.0.0");
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let fx = fixture("", "", "");
        let plan = fx.planner.create_migration_plan("1.1.0", "1.2.0");
        let mut dataset = Dataset::new("1.0.0");

        let result = MigrationExecutor::new()
            .execute_migration(&mut dataset, &plan, ExecuteOptions::default())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(fx.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_zero_timeout_is_invalid() {
        let fx = fixture("", "", "");
        let plan = fx.planner.create_migration_plan("1.0.0", "1.1.0");
        let mut dataset = Dataset::new("1.0.0");

        let err = MigrationExecutor::new()
            .execute_migration(
                &mut dataset,
                &plan,
                ExecuteOptions {
                    timeout: Some(Duration::ZERO),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }

    #[tokio::test]
    async fn test_downgrade_runs_rollbacks() {
        let fx = fixture("", "", "");
        let plan = fx.planner.create_migration_plan("1.2.0", "1.0.0");
        let mut dataset = Dataset::new("1.2.0").with_table(
            "trail",
            vec![json!({"step": "m1"}), json!({"step": "m2"})],
        );

        let result = MigrationExecutor::new()
            .execute_migration(&mut dataset, &plan, ExecuteOptions::default())
            .await
            .unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.applied_migrations, vec!["m2", "m1"]);
        assert_eq!(dataset.version(), "1.0.0");
        assert!(dataset.table("trail").unwrap().is_empty());
    }
}
