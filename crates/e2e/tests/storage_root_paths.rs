//! Storage roots opened through relative and absolute paths
//!
//! Changes the process working directory, so it lives in its own test binary.

use fieldcheck_e2e::{init_test_logging, DispatchFixture, MemoryStore};
use fieldcheck_engine::{CreateSnapshotOptions, RestoreOptions, SnapshotManager};
use tempfile::TempDir;

#[tokio::test]
async fn relative_root_survives_gc_through_absolute_root() {
    init_test_logging();
    let tmp = TempDir::new().unwrap();
    let dataset = DispatchFixture::new("paths").build();

    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(tmp.path()).unwrap();
    let relative = SnapshotManager::open_root("store").await.unwrap();
    let snapshot = relative
        .create_snapshot(&dataset, CreateSnapshotOptions::new("live"))
        .await
        .unwrap();
    std::env::set_current_dir(&previous).unwrap();

    assert!(snapshot.file_path.is_absolute());

    let absolute = SnapshotManager::open_root(tmp.path().join("store")).await.unwrap();
    let stats = absolute.collect_orphans().await.unwrap();

    assert_eq!(stats.removed_files, 0);
    assert!(snapshot.file_path.exists());
    assert_eq!(absolute.list_snapshots().await.unwrap(), vec![snapshot.clone()]);

    let store = MemoryStore::new();
    absolute
        .restore_snapshot(
            &snapshot.id,
            &store,
            RestoreOptions {
                drop_existing: true,
                validate_after_restore: true,
                timeout: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(store.tables(), dataset.tables);
}
