//! OSM export reader.
//!
//! The Overpass export is a single JSON array; hand-assembled extracts are
//! often one object per line. Both are accepted.

use std::path::Path;

use serde_json::Value;
use stillopen_core::RawRecord;
use tracing::{debug, warn};

use crate::StoreError;

/// Read a JSON array or newline-delimited JSON file into records.
pub fn read_json_records(path: &Path) -> Result<Vec<RawRecord>, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    let records = parse_json_records(&text)?;
    debug!(path = %path.display(), records = records.len(), "read json records");
    Ok(records)
}

/// Parse a JSON array of objects, or one object per non-blank line.
///
/// Entries that are not objects are skipped with a warning.
pub fn parse_json_records(text: &str) -> Result<Vec<RawRecord>, StoreError> {
    let trimmed = text.trim_start();
    let values: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?
    };

    let mut records = Vec::with_capacity(values.len());
    let mut skipped = 0usize;
    for value in values {
        match value {
            Value::Object(map) => records.push(map),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "skipped non-object JSON entries");
    }
    Ok(records)
}
