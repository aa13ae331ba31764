//! Fieldcheck scenario harness
//!
//! Shared pieces for the end-to-end scenarios under `tests/`:
//! - [`DispatchFixture`] builds identifiable field-service datasets
//! - [`MemoryStore`] is a [`fieldcheck_engine::BackingStore`] with failure injection
//! - [`ScriptedMigration`] and [`scripted_chain`] build version catalogs with
//!   controllable migrations

pub mod error;
pub mod fixtures;
pub mod migrations;
pub mod store;

pub use error::{E2eError, E2eResult};
pub use fixtures::{is_fixture_record, load_dataset, save_dataset, DispatchFixture};
pub use migrations::{scripted_chain, CallLog, ScriptedMigration};
pub use store::MemoryStore;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to warnings only.
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
