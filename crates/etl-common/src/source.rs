//! Source identification and extraction work units.

use serde::{Deserialize, Serialize};

/// The external dataset a record or artifact originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Batch CSV export of charging sessions.
    Sessions,
    /// Charging station registry API.
    Stations,
    /// Current-weather observation API.
    Weather,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Stations => "stations",
            Self::Weather => "weather",
        }
    }

    /// Warehouse staging table receiving this source's rows.
    pub fn staging_table(&self) -> &'static str {
        match self {
            Self::Sessions => "stg_ev_sessions",
            Self::Stations => "stg_stations",
            Self::Weather => "stg_weather",
        }
    }

    pub fn all() -> [SourceKind; 3] {
        [Self::Sessions, Self::Stations, Self::Weather]
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of extraction work: a state code for the station source, a
/// city identifier for the weather source. Enumerated by configuration
/// and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryPartition {
    pub label: String,
}

impl QueryPartition {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl std::fmt::Display for QueryPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}
