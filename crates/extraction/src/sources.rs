//! API source definitions: request building and payload unwrapping.
//!
//! A source knows how to turn one query partition into a fully-formed
//! request and how to dig the logical records out of the response
//! payload. Everything network-related lives in [`crate::fetch`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use etl_common::{EtlError, EtlResult, QueryPartition, SourceKind};

use crate::fetch::SourceRequest;

/// Field stamped onto each weather observation at collection time.
pub const EXTRACTION_TS_FIELD: &str = "extraction_timestamp";

/// A rate-limited HTTP source queried one partition at a time.
pub trait ApiSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Build the request for one partition.
    fn request(&self, partition: &QueryPartition) -> SourceRequest;

    /// Unwrap the logical records from one response payload.
    fn records(&self, payload: Value, fetched_at: DateTime<Utc>) -> EtlResult<Vec<Value>>;
}

/// Charging station registry (NREL-style): one request per state code,
/// records arrive as a `fuel_stations` array.
pub struct StationSource {
    pub base_url: String,
    pub api_key: String,
    pub limit: u32,
}

impl ApiSource for StationSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Stations
    }

    fn request(&self, partition: &QueryPartition) -> SourceRequest {
        SourceRequest {
            url: format!("{}.json", self.base_url),
            params: vec![
                ("api_key".into(), self.api_key.clone()),
                ("fuel_type".into(), "ELEC".into()),
                ("state".into(), partition.label.clone()),
                ("limit".into(), self.limit.to_string()),
                ("format".into(), "json".into()),
            ],
        }
    }

    fn records(&self, payload: Value, _fetched_at: DateTime<Utc>) -> EtlResult<Vec<Value>> {
        match payload.get("fuel_stations").and_then(Value::as_array) {
            Some(stations) => Ok(stations.clone()),
            None => Err(EtlError::PermanentSource(
                "response is missing the fuel_stations array".into(),
            )),
        }
    }
}

/// Current-weather API (OpenWeatherMap-style): one request per city,
/// the whole observation object is the record, stamped with the
/// extraction timestamp.
pub struct WeatherSource {
    pub base_url: String,
    pub api_key: String,
}

impl ApiSource for WeatherSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Weather
    }

    fn request(&self, partition: &QueryPartition) -> SourceRequest {
        SourceRequest {
            url: format!("{}/weather", self.base_url),
            params: vec![
                ("q".into(), partition.label.clone()),
                ("appid".into(), self.api_key.clone()),
                ("units".into(), "metric".into()),
            ],
        }
    }

    fn records(&self, payload: Value, fetched_at: DateTime<Utc>) -> EtlResult<Vec<Value>> {
        let mut observation = match payload {
            Value::Object(map) => map,
            _ => {
                return Err(EtlError::PermanentSource(
                    "weather response is not an object".into(),
                ))
            }
        };
        observation.insert(
            EXTRACTION_TS_FIELD.into(),
            Value::String(fetched_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        Ok(vec![Value::Object(observation)])
    }
}
