//! Dataset codecs and integrity digests
//!
//! A snapshot payload is the exact byte sequence written to disk. Both codecs
//! produce deterministic output for a given set of tables, so the SHA-256
//! digest of a payload identifies its content.

mod json;
mod sql;

pub use json::{decode_json, encode_json};
pub use sql::{decode_sql, encode_sql};

use crate::error::FsContext;
use crate::types::{SnapshotFormat, Tables};
use crate::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Serialize tables with the given format
pub fn encode(tables: &Tables, format: SnapshotFormat) -> Result<Vec<u8>> {
    match format {
        SnapshotFormat::Sql => encode_sql(tables),
        SnapshotFormat::Json => encode_json(tables),
    }
}

/// Parse a payload produced by [`encode`] back into tables
pub fn decode(payload: &[u8], format: SnapshotFormat) -> Result<Tables> {
    match format {
        SnapshotFormat::Sql => decode_sql(payload),
        SnapshotFormat::Json => decode_json(payload),
    }
}

/// Compute the SHA-256 hex digest of data
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the SHA-256 hex digest of a file
pub async fn checksum_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = tokio::fs::File::open(path)
        .await
        .fs_context("open", path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer).await.fs_context("read", path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Apply include/exclude table filters.
///
/// An empty include list selects every table. Exclusion wins over inclusion.
pub fn select_tables(tables: &Tables, include: &[String], exclude: &[String]) -> Tables {
    let selected: Tables = tables
        .iter()
        .filter(|(name, _)| include.is_empty() || include.contains(name))
        .filter(|(name, _)| !exclude.contains(name))
        .map(|(name, records)| (name.clone(), records.clone()))
        .collect();

    for name in include {
        if !tables.contains_key(name) {
            debug!("Included table '{}' not present in dataset", name);
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Tables {
        let mut tables = Tables::new();
        tables.insert(
            "customers".to_string(),
            vec![json!({"id": 1, "name": "Acme"}), json!({"id": 2, "name": "Globex"})],
        );
        tables.insert("routes".to_string(), vec![json!({"id": "r-1"})]);
        tables.insert("audit_log".to_string(), vec![]);
        tables
    }

    #[test]
    fn test_checksum_known_value() {
        assert_eq!(
            checksum(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn test_checksum_file_matches_memory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("payload.sql");
        tokio::fs::write(&path, b"-- dump\n").await.unwrap();

        assert_eq!(checksum_file(&path).await.unwrap(), checksum(b"-- dump\n"));
    }

    #[tokio::test]
    async fn test_checksum_missing_file_names_operation() {
        let err = checksum_file("/nonexistent/fieldcheck/payload.sql")
            .await
            .unwrap_err();
        assert!(err.is_fs());
        assert!(err.to_string().contains("open"));
    }

    #[test]
    fn test_select_tables() {
        let tables = sample();

        let all = select_tables(&tables, &[], &[]);
        assert_eq!(all.len(), 3);

        let included = select_tables(&tables, &["customers".to_string()], &[]);
        assert_eq!(included.keys().collect::<Vec<_>>(), vec!["customers"]);

        let excluded = select_tables(&tables, &[], &["audit_log".to_string()]);
        assert!(!excluded.contains_key("audit_log"));
        assert_eq!(excluded.len(), 2);

        let both = select_tables(
            &tables,
            &["customers".to_string(), "routes".to_string()],
            &["routes".to_string()],
        );
        assert_eq!(both.keys().collect::<Vec<_>>(), vec!["customers"]);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let tables = sample();
        for format in [SnapshotFormat::Sql, SnapshotFormat::Json] {
            let a = encode(&tables, format).unwrap();
            let b = encode(&tables, format).unwrap();
            assert_eq!(checksum(&a), checksum(&b));
            assert_eq!(decode(&a, format).unwrap(), tables);
        }
    }
}
