//! Star-schema mappings for the three sources.
//!
//! Targets are the staging-table column layouts: `stg_ev_sessions` is
//! the fact-grain table, `stg_stations` and `stg_weather` feed the
//! station and weather dimensions. Paths address the raw records as
//! extracted: export header names for sessions, API field paths for
//! stations and weather.

use etl_common::SourceKind;

use crate::mapping::{Coercion, MappingEntry, SchemaMapping};

const PIPE: Coercion = Coercion::JoinList { delimiter: '|' };

/// The mapping table for one source kind.
pub fn mapping_for(source: SourceKind) -> SchemaMapping {
    match source {
        SourceKind::Sessions => sessions_mapping(),
        SourceKind::Stations => stations_mapping(),
        SourceKind::Weather => weather_mapping(),
    }
}

fn sessions_mapping() -> SchemaMapping {
    SchemaMapping {
        source: SourceKind::Sessions,
        entries: vec![
            MappingEntry::new("user_id", "User ID", Coercion::Verbatim),
            MappingEntry::new("vehicle_model", "Vehicle Model", Coercion::Verbatim),
            MappingEntry::new("battery_capacity_kwh", "Battery Capacity (kWh)", Coercion::Number),
            MappingEntry::new("station_id", "Charging Station ID", Coercion::Verbatim),
            MappingEntry::new("station_location", "Charging Station Location", Coercion::Verbatim),
            MappingEntry::new("start_time", "Charging Start Time", Coercion::Timestamp),
            MappingEntry::new("end_time", "Charging End Time", Coercion::Timestamp),
            MappingEntry::new("energy_kwh", "Energy Consumed (kWh)", Coercion::Number),
            MappingEntry::new("duration_hours", "Charging Duration (hours)", Coercion::Number),
            MappingEntry::new("charging_rate_kw", "Charging Rate (kW)", Coercion::Number),
            MappingEntry::new("cost_usd", "Charging Cost (USD)", Coercion::Number),
            MappingEntry::new("time_of_day", "Time of Day", Coercion::Verbatim),
            MappingEntry::new("day_of_week", "Day of Week", Coercion::Verbatim),
            MappingEntry::new("soc_start_pct", "State of Charge (Start %)", Coercion::Number),
            MappingEntry::new("soc_end_pct", "State of Charge (End %)", Coercion::Number),
            MappingEntry::new(
                "distance_km",
                "Distance Driven (since last charge) (km)",
                Coercion::Number,
            ),
            MappingEntry::new("temperature_c", "Temperature (°C)", Coercion::Number),
            MappingEntry::new("vehicle_age_years", "Vehicle Age (years)", Coercion::Number),
            MappingEntry::new("charger_type", "Charger Type", Coercion::Verbatim),
            MappingEntry::new("user_type", "User Type", Coercion::Verbatim),
        ],
    }
}

fn stations_mapping() -> SchemaMapping {
    SchemaMapping {
        source: SourceKind::Stations,
        entries: vec![
            MappingEntry::new("station_id", "id", Coercion::Number),
            MappingEntry::new("station_name", "station_name", Coercion::Verbatim),
            MappingEntry::new("street_address", "street_address", Coercion::Verbatim),
            MappingEntry::new("city", "city", Coercion::Verbatim),
            MappingEntry::new("state", "state", Coercion::Verbatim),
            MappingEntry::new("zip", "zip", Coercion::Verbatim),
            MappingEntry::new("country", "country", Coercion::Verbatim),
            MappingEntry::new("latitude", "latitude", Coercion::Number),
            MappingEntry::new("longitude", "longitude", Coercion::Number),
            MappingEntry::new("ev_connector_types", "ev_connector_types", PIPE),
            MappingEntry::new("access_days_time", "access_days_time", Coercion::Verbatim),
            MappingEntry::new("station_type", "station_type", Coercion::Verbatim),
        ],
    }
}

fn weather_mapping() -> SchemaMapping {
    SchemaMapping {
        source: SourceKind::Weather,
        entries: vec![
            MappingEntry::new("extraction_timestamp", "extraction_timestamp", Coercion::Timestamp),
            MappingEntry::new("city", "name", Coercion::Verbatim),
            // Observations can carry several conditions; the first entry
            // is the reported one.
            MappingEntry::new("weather_main", "weather.0.main", Coercion::Verbatim),
            MappingEntry::new("weather_description", "weather.0.description", Coercion::Verbatim),
            MappingEntry::new("temp_celsius", "main.temp", Coercion::Number),
            MappingEntry::new("humidity", "main.humidity", Coercion::Number),
            MappingEntry::new("wind_speed", "wind.speed", Coercion::Number),
        ],
    }
}
