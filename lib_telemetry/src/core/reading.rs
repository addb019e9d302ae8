//! # Reading Model
//!
//! A [`Reading`] only exists once a frame has passed validation. Numeric fields
//! keep their wire representation as [`serde_json::Number`] so that an integer
//! water level is stored and broadcast as an integer.

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Number;

/// Wire key of the household identifier.
pub const HOME_ID: &str = "HomeID";
/// Wire key of the water level.
pub const WATER_LEVEL: &str = "CurrentWaterLevel";
/// Wire key of the electricity usage.
pub const ELECTRICITY_USAGE: &str = "ElectricityUsage";
/// Wire key of the instantaneous power draw.
pub const POWER: &str = "Power";
/// Wire key of the pump flag.
pub const PUMP_RUNNING: &str = "PumpRunningStatus";

/// Human readable timestamp layout used on the wire and in stored documents.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A fully validated telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Originating household.
    #[serde(rename = "HomeID")]
    pub home_id: u64,
    /// Water level (percentage or volume), never negative.
    #[serde(rename = "CurrentWaterLevel")]
    pub water_level: Number,
    /// Electricity usage, never negative.
    #[serde(rename = "ElectricityUsage")]
    pub electricity_usage: Number,
    /// Instantaneous power draw, never negative.
    #[serde(rename = "Power")]
    pub power: Number,
    /// Whether the pump is running.
    #[serde(rename = "PumpRunningStatus")]
    pub pump_running: bool,
}

/// A [`Reading`] with the timestamp the pipeline assigned on acceptance.
///
/// Built once per ingestion cycle; the sink and the hub both read this same value.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedReading {
    /// The validated reading.
    pub reading: Reading,
    /// Acceptance time, monotonically non-decreasing within one ingestion loop.
    pub ingested_at: DateTime<Local>,
}

impl StampedReading {
    /// `ingested_at` rendered as `YYYY-MM-DD HH:MM:SS`.
    pub fn timestamp(&self) -> String {
        self.ingested_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// The document appended to the store: every reading field, the human
    /// readable `timestamp` and the precise `ingestedAt`.
    pub fn document(&self) -> Document<'_> {
        Document {
            reading: &self.reading,
            timestamp: self.timestamp(),
            ingested_at: self.ingested_at.to_rfc3339(),
        }
    }
}

/// Stored form of a [`StampedReading`].
#[derive(Debug, Serialize)]
pub struct Document<'a> {
    /// Reading fields, under their wire keys.
    #[serde(flatten)]
    pub reading: &'a Reading,
    /// `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    /// RFC 3339 acceptance time.
    #[serde(rename = "ingestedAt")]
    pub ingested_at: String,
}

/// Hands out acceptance timestamps that never go backwards, even if the wall
/// clock is stepped back between two cycles.
#[derive(Debug, Default)]
pub struct Stamper {
    last: Option<DateTime<Local>>,
}

impl Stamper {
    /// Creates a stamper with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps `reading` with the current time.
    pub fn stamp(&mut self, reading: Reading) -> StampedReading {
        self.stamp_at(reading, Local::now())
    }

    /// Stamps `reading` with `now`, clamped to the previous stamp.
    pub fn stamp_at(&mut self, reading: Reading, now: DateTime<Local>) -> StampedReading {
        let ingested_at = match self.last {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last = Some(ingested_at);
        StampedReading {
            reading,
            ingested_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn sample() -> Reading {
        Reading {
            home_id: 1,
            water_level: Number::from(55),
            electricity_usage: Number::from_f64(120.5).unwrap(),
            power: Number::from_f64(30.2).unwrap(),
            pump_running: true,
        }
    }

    #[test]
    fn document_keeps_wire_representation() {
        let at = Local.with_ymd_and_hms(2024, 10, 1, 8, 30, 5).unwrap();
        let stamped = Stamper::new().stamp_at(sample(), at);
        let doc = serde_json::to_value(stamped.document()).unwrap();

        assert_eq!(doc["HomeID"], json!(1));
        assert_eq!(doc["CurrentWaterLevel"].to_string(), "55");
        assert_eq!(doc["ElectricityUsage"], json!(120.5));
        assert_eq!(doc["Power"], json!(30.2));
        assert_eq!(doc["PumpRunningStatus"], json!(true));
        assert_eq!(doc["timestamp"], json!("2024-10-01 08:30:05"));
        assert_eq!(doc["ingestedAt"], json!(at.to_rfc3339()));
    }

    #[test]
    fn stamper_never_goes_backwards() {
        let mut stamper = Stamper::new();
        let t0 = Local.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap();

        let first = stamper.stamp_at(sample(), t0);
        let stepped_back = stamper.stamp_at(sample(), t0 - Duration::seconds(30));
        let later = stamper.stamp_at(sample(), t0 + Duration::seconds(1));

        assert_eq!(first.ingested_at, t0);
        assert_eq!(stepped_back.ingested_at, t0);
        assert_eq!(later.ingested_at, t0 + Duration::seconds(1));
    }
}
