//! JSON snapshot payloads: `{"tables": [...], "data": {"<table>": [...]}}`

use crate::types::Tables;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct JsonDumpRef<'a> {
    tables: Vec<&'a str>,
    data: &'a Tables,
}

#[derive(Deserialize)]
struct JsonDump {
    #[serde(default)]
    tables: Vec<String>,
    data: Tables,
}

pub fn encode_json(tables: &Tables) -> Result<Vec<u8>> {
    let dump = JsonDumpRef {
        tables: tables.keys().map(String::as_str).collect(),
        data: tables,
    };
    let mut bytes = serde_json::to_vec_pretty(&dump)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode a JSON payload. Extra top-level fields (such as the version and
/// timestamp carried by backups) are ignored.
pub fn decode_json(payload: &[u8]) -> Result<Tables> {
    let dump: JsonDump = serde_json::from_slice(payload)
        .map_err(|e| Error::Codec(format!("invalid JSON snapshot: {}", e)))?;

    let mut data = dump.data;
    for name in dump.tables {
        data.entry(name).or_default();
    }
    Ok(data)
}
