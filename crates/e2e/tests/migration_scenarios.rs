//! Planning and executing dataset migrations end to end

use fieldcheck_e2e::{init_test_logging, scripted_chain, CallLog, DispatchFixture, MemoryStore};
use fieldcheck_engine::{
    BackupPolicy, ExecuteOptions, Migration, MigrationExecutor, MigrationPlanner,
    RestoreOptions, SnapshotManager, StepDirection, VersionRegistry,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use test_case::test_case;

const CHAIN: [&str; 4] = ["1.0.0", "1.1.0", "1.2.0", "2.0.0"];

fn builtin_planner() -> MigrationPlanner {
    MigrationPlanner::new(Arc::new(VersionRegistry::with_builtin_versions()))
}

#[test_case("1.0.0", "1.1.0", 1, false ; "single minor step")]
#[test_case("1.0.0", "1.2.0", 2, false ; "two minor steps")]
#[test_case("1.0.0", "2.0.0", 3, true ; "through breaking")]
#[test_case("1.2.0", "2.0.0", 1, true ; "breaking only")]
#[test_case("2.0.0", "1.1.0", 2, true ; "downgrade across breaking")]
#[test_case("1.2.0", "1.0.0", 2, false ; "minor downgrade")]
#[test_case("1.1.0", "1.1.0", 0, false ; "same version")]
fn builtin_plan_shapes(from: &str, to: &str, steps: usize, backup: bool) {
    let plan = builtin_planner().create_migration_plan(from, to);

    assert!(plan.gaps.is_empty(), "unexpected gaps: {:?}", plan.gaps);
    assert_eq!(plan.migrations.len(), steps);
    assert_eq!(plan.backup_required, backup);
    assert_eq!(plan.estimated_duration.as_millis() as usize, steps * 5000);
}

#[test]
fn downgrade_plan_reverses_steps() {
    let plan = builtin_planner().create_migration_plan("2.0.0", "1.0.0");

    assert!(plan.is_downgrade());
    assert_eq!(
        plan.migration_ids(),
        vec![
            "2.0.0-customer-contact",
            "1.2.0-route-estimate",
            "1.1.0-ticket-priority"
        ]
    );
    assert!(plan
        .migrations
        .iter()
        .all(|s| s.direction == StepDirection::Reverse));
    assert!(plan.risks.iter().any(|r| r.starts_with("Downgrade")));

    let strict = builtin_planner().with_policy(BackupPolicy::OnMajorOrDowngrade);
    assert!(strict.create_migration_plan("1.1.0", "1.0.0").backup_required);
}

#[test]
fn unknown_versions_produce_gaps() {
    let planner = builtin_planner();

    let plan = planner.create_migration_plan("1.0.0", "9.9.9");
    assert!(!plan.is_executable());
    assert!(plan.migrations.is_empty());
    assert!(plan.gaps.iter().any(|g| g.contains("9.9.9")));

    assert!(planner.try_create_migration_plan("0.1.0", "1.0.0").is_err());
}

#[test]
fn compatibility_scenario() {
    let versions = VersionRegistry::with_builtin_versions();

    let minor = versions.check_compatibility("1.0.0", "1.2.0");
    assert!(minor.is_compatible);

    let upgrade = versions.check_compatibility("1.0.0", "2.0.0");
    assert!(!upgrade.is_compatible);
    assert!(upgrade
        .recommendations
        .iter()
        .any(|r| r.contains("migration guide")));

    let major = versions.check_compatibility("1.2.0", "2.0.0");
    assert!(!major.is_compatible);
    assert!(major.issues.iter().any(|i| i.contains("Major version upgrade")));
    assert!(!major.recommendations.is_empty());

    let downgrade = versions.check_compatibility("2.0.0", "1.0.0");
    assert!(!downgrade.is_compatible);
}

#[tokio::test]
async fn dry_run_leaves_everything_untouched() {
    init_test_logging();
    let log = CallLog::new();
    let planner = MigrationPlanner::new(Arc::new(scripted_chain(&CHAIN, |m| m, &log)));
    let plan = planner.create_migration_plan("1.0.0", "2.0.0");
    let mut dataset = DispatchFixture::new("dry").build();
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
    assert!(log.is_empty());
    assert_eq!(dataset, before);
}

#[tokio::test]
async fn second_step_failure_rolls_back_first() {
    init_test_logging();
    let log = CallLog::new();
    let registry = scripted_chain(
        &CHAIN,
        |m| {
            if m.to_version() == "1.2.0" {
                m.failing()
            } else {
                m
            }
        },
        &log,
    );
    let planner = MigrationPlanner::new(Arc::new(registry));
    let plan = planner.create_migration_plan("1.0.0", "1.2.0");
    let mut dataset = DispatchFixture::new("fail").build();
    let before = dataset.clone();

    let result = MigrationExecutor::new()
        .execute_migration(&mut dataset, &plan, ExecuteOptions::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.applied_migrations, vec!["1.0.0-to-1.1.0"]);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("1.1.0-to-1.2.0"));
    assert!(result
        .warnings
        .contains(&"Rolled back migration 1.0.0-to-1.1.0".to_string()));
    assert_eq!(
        log.entries(),
        vec![
            "migrate:1.0.0-to-1.1.0",
            "migrate:1.1.0-to-1.2.0",
            "rollback:1.0.0-to-1.1.0"
        ]
    );
    assert_eq!(dataset, before);
}

#[tokio::test]
async fn irreversible_step_is_reported_not_undone() {
    init_test_logging();
    let log = CallLog::new();
    let registry = scripted_chain(
        &CHAIN,
        |m| {
            let target = m.to_version().to_string();
            match target.as_str() {
                "1.1.0" => m.irreversible(),
                "1.2.0" => m.failing(),
                _ => m,
            }
        },
        &log,
    );
    let planner = MigrationPlanner::new(Arc::new(registry));
    let plan = planner.create_migration_plan("1.0.0", "1.2.0");
    assert!(plan
        .risks
        .iter()
        .any(|r| r.contains("1.0.0-to-1.1.0 has no rollback")));

    let mut dataset = DispatchFixture::new("oneway").build();
    let result = MigrationExecutor::new()
        .execute_migration(&mut dataset, &plan, ExecuteOptions::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("1.0.0-to-1.1.0 has no rollback")));
    assert!(!log.entries().iter().any(|e| e.starts_with("rollback:")));
    assert_eq!(dataset.version(), "1.0.0");
}

#[tokio::test]
async fn builtin_upgrade_with_backup_and_restore() {
    init_test_logging();
    let tmp = TempDir::new().unwrap();
    let snapshots = SnapshotManager::open_root(tmp.path()).await.unwrap();
    let plan = builtin_planner().create_migration_plan("1.0.0", "2.0.0");
    assert!(plan.backup_required);

    let mut dataset = DispatchFixture::new("upgrade").build();
    let original = dataset.clone();

    let result = MigrationExecutor::with_snapshots(snapshots.clone())
        .execute_migration(&mut dataset, &plan, ExecuteOptions::default())
        .await
        .unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.applied_migrations.len(), 3);
    assert_eq!(dataset.version(), "2.0.0");

    let customer = &dataset.table("customers").unwrap()[0];
    assert!(customer.get("phone").is_none());
    assert_eq!(customer["contact"]["email"], original.tables["customers"][0]["email"]);
    assert!(dataset
        .table("tickets")
        .unwrap()
        .iter()
        .all(|t| t["priority"] == json!("normal")));
    assert!(dataset
        .table("routes")
        .unwrap()
        .iter()
        .all(|r| r.get("estimatedMinutes").is_some()));

    let backup_path = result.backup_path.unwrap();
    assert!(backup_path.starts_with(snapshots.config().backups_dir()));

    let backups = snapshots.find_by_tag("backup").await.unwrap();
    assert_eq!(backups.len(), 1);
    assert!(backups[0].has_tag("1.0.0"));

    // The backup restores the pre-migration data.
    let store = MemoryStore::new();
    snapshots
        .restore_snapshot(
            &backups[0].id,
            &store,
            RestoreOptions {
                drop_existing: true,
                validate_after_restore: true,
                timeout: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(store.tables(), original.tables);
}

#[tokio::test]
async fn builtin_downgrade_restores_original_shape() {
    init_test_logging();
    let planner = builtin_planner();
    let mut dataset = DispatchFixture::new("roundtrip").build();
    let original = dataset.clone();
    let executor = MigrationExecutor::new();

    let up = planner.create_migration_plan("1.0.0", "1.2.0");
    assert!(executor
        .execute_migration(&mut dataset, &up, ExecuteOptions::default())
        .await
        .unwrap()
        .success);

    let down = planner.create_migration_plan("1.2.0", "1.0.0");
    let result = executor
        .execute_migration(&mut dataset, &down, ExecuteOptions::default())
        .await
        .unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(dataset.version(), "1.0.0");
    assert_eq!(dataset.tables, original.tables);
}
