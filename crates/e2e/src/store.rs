//! In-memory backing store
//!
//! Stands in for the database a dispatch test run restores into. Failures
//! and latency can be injected to exercise restore error paths.

use async_trait::async_trait;
use fieldcheck_engine::{codec, BackingStore, Error, Result, SnapshotFormat, Tables};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    applies: usize,
    drops: usize,
}

/// Backing store that keeps restored tables in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    apply_delay: Option<Duration>,
    fail_apply: bool,
    /// Rows silently discarded per applied table
    drop_rows: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds data
    pub fn seeded(tables: Tables) -> Self {
        let store = Self::default();
        store.state.lock().tables = tables;
        store
    }

    /// Sleep before every apply
    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = Some(delay);
        self
    }

    /// Reject every apply
    pub fn failing(mut self) -> Self {
        self.fail_apply = true;
        self
    }

    /// Lose `rows` rows of every table on apply
    pub fn lossy(mut self, rows: usize) -> Self {
        self.drop_rows = rows;
        self
    }

    pub fn tables(&self) -> Tables {
        self.state.lock().tables.clone()
    }

    pub fn table(&self, name: &str) -> Option<Vec<Value>> {
        self.state.lock().tables.get(name).cloned()
    }

    pub fn apply_count(&self) -> usize {
        self.state.lock().applies
    }

    pub fn drop_count(&self) -> usize {
        self.state.lock().drops
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn apply(&self, payload: &[u8], format: SnapshotFormat) -> Result<()> {
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_apply {
            return Err(Error::BackingStore("store is read-only".to_string()));
        }

        let decoded = codec::decode(payload, format)?;
        let mut state = self.state.lock();
        for (name, mut records) in decoded {
            let keep = records.len().saturating_sub(self.drop_rows);
            records.truncate(keep);
            debug!("Applying {} rows to {}", records.len(), name);
            state.tables.entry(name).or_default().extend(records);
        }
        state.applies += 1;
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.tables.clear();
        state.drops += 1;
        Ok(())
    }

    async fn row_counts(&self) -> Result<BTreeMap<String, usize>> {
        Ok(self
            .state
            .lock()
            .tables
            .iter()
            .map(|(name, rows)| (name.clone(), rows.len()))
            .collect())
    }
}
