//! Declarative schema mappings and their pure evaluator.
//!
//! A mapping describes WHAT maps to what; the resolver here knows HOW to
//! walk the raw structure. Evaluation is pure (no I/O, no shared state),
//! deterministic, and total over the declared field set: every target
//! field is produced for every record, with absent values rendered as
//! the explicit null marker rather than an omitted key.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use etl_common::{EtlError, EtlResult, SourceKind};

/// Explicit representation of an absent value in staging output.
pub const NULL_MARKER: &str = "";

/// How a resolved source value becomes a staging cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Strings pass through; scalars render with their JSON text.
    Verbatim,
    /// Numeric pass-through; a non-numeric value is a mapping error.
    Number,
    /// Canonical ISO-8601; a malformed timestamp is a mapping error.
    Timestamp,
    /// A list of strings joined into one cell with a fixed delimiter.
    JoinList { delimiter: char },
}

/// One (target field ← source path) rule.
#[derive(Debug, Clone)]
pub struct MappingEntry {
    pub target: &'static str,
    /// Dot-path into the raw record; numeric segments index arrays.
    pub path: &'static str,
    pub default: Option<&'static str>,
    pub coercion: Coercion,
}

impl MappingEntry {
    pub const fn new(target: &'static str, path: &'static str, coercion: Coercion) -> Self {
        Self {
            target,
            path,
            default: None,
            coercion,
        }
    }

    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }
}

/// The declarative table for one source kind.
#[derive(Debug, Clone)]
pub struct SchemaMapping {
    pub source: SourceKind,
    pub entries: Vec<MappingEntry>,
}

impl SchemaMapping {
    /// Target field names, in output order.
    pub fn target_fields(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.target).collect()
    }

    /// Every target field must be covered by exactly one entry.
    pub fn validate(&self) -> EtlResult<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.target) {
                return Err(EtlError::Config(format!(
                    "target field '{}' is mapped more than once for {}",
                    entry.target, self.source
                )));
            }
        }
        Ok(())
    }

    /// Map one raw record to a normalized row, one cell per entry in
    /// declaration order. A coercion failure tags the whole record with
    /// a `Mapping` error; the caller decides whether to exclude it.
    pub fn map_record(&self, record: &Value) -> EtlResult<Vec<String>> {
        self.entries
            .iter()
            .map(|entry| Self::map_field(entry, record))
            .collect()
    }

    fn map_field(entry: &MappingEntry, record: &Value) -> EtlResult<String> {
        let resolved = resolve_path(record, entry.path);

        // An absent, null, or empty source value is not an error: it
        // takes the configured default or the explicit null marker.
        let value = match resolved {
            None | Some(Value::Null) => {
                return Ok(entry.default.unwrap_or(NULL_MARKER).to_string())
            }
            Some(Value::String(s)) if s.is_empty() => {
                return Ok(entry.default.unwrap_or(NULL_MARKER).to_string())
            }
            Some(value) => value,
        };

        match entry.coercion {
            Coercion::Verbatim => Ok(render_scalar(value)),
            Coercion::Number => coerce_number(value).ok_or_else(|| EtlError::Mapping {
                field: entry.target.to_string(),
                message: format!("not a number: {value}"),
            }),
            Coercion::Timestamp => coerce_timestamp(value).ok_or_else(|| EtlError::Mapping {
                field: entry.target.to_string(),
                message: format!("malformed timestamp: {value}"),
            }),
            Coercion::JoinList { delimiter } => Ok(join_list(value, delimiter)),
        }
    }
}

/// Walk a dot-path through objects and arrays.
fn resolve_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn coerce_number(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<f64>().ok().map(|_| trimmed.to_string())
        }
        _ => None,
    }
}

/// Accept RFC 3339 or the common space/`T`-separated layouts and emit a
/// canonical ISO-8601 string. Offset-aware inputs normalize to UTC `Z`;
/// naive inputs stay naive.
fn coerce_timestamp(value: &Value) -> Option<String> {
    let text = value.as_str()?.trim();

    if let Ok(aware) = DateTime::parse_from_rfc3339(text) {
        return Some(
            aware
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    }

    None
}

fn join_list(value: &Value, delimiter: char) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(render_scalar)
            .collect::<Vec<_>>()
            .join(&delimiter.to_string()),
        // The original feed occasionally carries a bare string here.
        other => render_scalar(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping() -> SchemaMapping {
        SchemaMapping {
            source: SourceKind::Stations,
            entries: vec![
                MappingEntry::new("id", "id", Coercion::Number),
                MappingEntry::new("city", "address.city", Coercion::Verbatim),
                MappingEntry::new("country", "address.country", Coercion::Verbatim)
                    .with_default("US"),
                MappingEntry::new("connectors", "connectors", Coercion::JoinList { delimiter: '|' }),
                MappingEntry::new("seen_at", "seen_at", Coercion::Timestamp),
            ],
        }
    }

    #[test]
    fn produces_every_target_field_in_order() {
        let record = json!({
            "id": 7,
            "address": {"city": "Austin"},
            "connectors": ["J1772", "CCS"],
            "seen_at": "2025-08-06 10:30:00",
        });
        let row = mapping().map_record(&record).unwrap();
        assert_eq!(row, vec!["7", "Austin", "US", "J1772|CCS", "2025-08-06T10:30:00"]);
        assert_eq!(row.len(), mapping().target_fields().len());
    }

    #[test]
    fn absent_values_become_the_null_marker_not_an_absent_key() {
        let row = mapping().map_record(&json!({"id": 1})).unwrap();
        assert_eq!(row, vec!["1", NULL_MARKER, "US", NULL_MARKER, NULL_MARKER]);
    }

    #[test]
    fn malformed_timestamp_is_a_tagged_mapping_error() {
        let record = json!({"id": 1, "seen_at": "not-a-time"});
        let err = mapping().map_record(&record).unwrap_err();
        match err {
            EtlError::Mapping { field, message } => {
                assert_eq!(field, "seen_at");
                assert!(message.contains("malformed timestamp"));
            }
            other => panic!("expected Mapping error, got {other:?}"),
        }
    }

    #[test]
    fn offset_aware_timestamps_normalize_to_utc() {
        let mapping = SchemaMapping {
            source: SourceKind::Weather,
            entries: vec![MappingEntry::new("ts", "ts", Coercion::Timestamp)],
        };
        let row = mapping
            .map_record(&json!({"ts": "2025-08-06T10:30:00+02:00"}))
            .unwrap();
        assert_eq!(row, vec!["2025-08-06T08:30:00Z"]);
    }

    #[test]
    fn numeric_strings_pass_through_and_junk_does_not() {
        let mapping = SchemaMapping {
            source: SourceKind::Sessions,
            entries: vec![MappingEntry::new("kwh", "kwh", Coercion::Number)],
        };
        assert_eq!(mapping.map_record(&json!({"kwh": "42.5"})).unwrap(), vec!["42.5"]);
        assert_eq!(mapping.map_record(&json!({"kwh": 18})).unwrap(), vec!["18"]);
        assert!(mapping.map_record(&json!({"kwh": "a lot"})).is_err());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let record = json!({
            "id": 7,
            "address": {"city": "Austin"},
            "connectors": ["CHAdeMO"],
            "seen_at": "2025-08-06 10:30:00",
        });
        let first = mapping().map_record(&record).unwrap();
        let second = mapping().map_record(&record).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_targets_fail_validation() {
        let mapping = SchemaMapping {
            source: SourceKind::Weather,
            entries: vec![
                MappingEntry::new("a", "x", Coercion::Verbatim),
                MappingEntry::new("a", "y", Coercion::Verbatim),
            ],
        };
        assert!(mapping.validate().is_err());
    }
}
