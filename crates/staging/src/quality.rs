//! Post-transform data-quality checks and diagnostics.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use etl_common::{EtlError, EtlResult};

/// Verify a staging file is non-empty and carries exactly the expected
/// header. Run after the atomic write, before the loader sees the file.
pub fn validate_staging_file(path: &Path, expected_header: &[&str]) -> EtlResult<()> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| EtlError::Csv(e.to_string()))?;

    let header = reader
        .headers()
        .map_err(|e| EtlError::Csv(e.to_string()))?
        .clone();
    let actual: Vec<&str> = header.iter().collect();
    if actual != expected_header {
        return Err(EtlError::TransformFailed(format!(
            "staging file {} header mismatch: expected {:?}, found {:?}",
            path.display(),
            expected_header,
            actual
        )));
    }

    let mut rows = 0usize;
    for row in reader.records() {
        row.map_err(|e| EtlError::Csv(e.to_string()))?;
        rows += 1;
    }
    if rows == 0 {
        return Err(EtlError::TransformFailed(format!(
            "staging file {} is empty",
            path.display()
        )));
    }

    Ok(())
}

/// Count duplicate (user id, start time) occurrences in raw session
/// records. Diagnostic only: duplicates are reported, never dropped.
pub fn duplicate_session_keys(records: &[Value]) -> usize {
    let mut counts: HashMap<(String, String), usize> = HashMap::new();
    for record in records {
        let user = record.get("User ID").and_then(Value::as_str);
        let start = record.get("Charging Start Time").and_then(Value::as_str);
        if let (Some(user), Some(start)) = (user, start) {
            *counts.entry((user.to_string(), start.to_string())).or_insert(0) += 1;
        }
    }
    counts.values().filter(|&&n| n > 1).map(|n| n - 1).sum()
}
