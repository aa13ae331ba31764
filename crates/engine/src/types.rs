//! Core types for the fieldcheck engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Named record collections keyed by table name
pub type Tables = BTreeMap<String, Vec<Value>>;

/// Dataset metadata block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    pub created_at: DateTime<Utc>,
    pub version: String,
    #[serde(default)]
    pub test_run_id: Option<String>,
}

/// A test dataset: record collections plus metadata.
///
/// Record contents are never interpreted by the engine except through codecs
/// and migrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub metadata: DatasetMetadata,
    #[serde(default)]
    pub tables: Tables,
}

impl Dataset {
    /// Create an empty dataset at the given version
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            metadata: DatasetMetadata {
                created_at: Utc::now(),
                version: version.into(),
                test_run_id: None,
            },
            tables: Tables::new(),
        }
    }

    pub fn with_test_run_id(mut self, test_run_id: impl Into<String>) -> Self {
        self.metadata.test_run_id = Some(test_run_id.into());
        self
    }

    pub fn with_table(mut self, name: impl Into<String>, records: Vec<Value>) -> Self {
        self.tables.insert(name.into(), records);
        self
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn table(&self, name: &str) -> Option<&Vec<Value>> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Vec<Value>> {
        self.tables.get_mut(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Total number of records across all tables
    pub fn record_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

/// Snapshot serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotFormat {
    Sql,
    Json,
}

impl Default for SnapshotFormat {
    fn default() -> Self {
        Self::Sql
    }
}

impl SnapshotFormat {
    /// Parse a format name, falling back to SQL for anything unrecognized
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "sql" => Self::Sql,
            other => {
                tracing::warn!("Unrecognized snapshot format '{}', using sql", other);
                Self::Sql
            }
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SnapshotFormat::Sql => "sql",
            SnapshotFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for SnapshotFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Descriptive metadata stored with a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
}

/// A registered snapshot record. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub format: SnapshotFormat,
    pub file_path: PathBuf,
    pub size: u64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_fallback() {
        assert_eq!(SnapshotFormat::parse_lenient("JSON"), SnapshotFormat::Json);
        assert_eq!(SnapshotFormat::parse_lenient("sql"), SnapshotFormat::Sql);
        assert_eq!(SnapshotFormat::parse_lenient("parquet"), SnapshotFormat::Sql);
    }

    #[test]
    fn test_snapshot_uses_camel_case_keys() {
        let snapshot = Snapshot {
            id: "abc".to_string(),
            name: "baseline".to_string(),
            format: SnapshotFormat::Json,
            file_path: PathBuf::from("/tmp/baseline.json"),
            size: 12,
            checksum: "00".to_string(),
            created_at: Utc::now(),
            metadata: SnapshotMetadata::default(),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value.get("filePath").is_some());
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["format"], json!("json"));
    }

    #[test]
    fn test_dataset_record_count() {
        let dataset = Dataset::new("1.0.0")
            .with_table("customers", vec![json!({"id": 1}), json!({"id": 2})])
            .with_table("tickets", vec![json!({"id": 10})]);

        assert_eq!(dataset.record_count(), 3);
        assert_eq!(dataset.table_names(), vec!["customers", "tickets"]);
    }
}
