//! Measurement and device-profile records
//!
//! Wire and blob field names are camelCase (`deviceId`), matching the
//! change-capture payloads produced by the live tables.

use crate::ids::{DeviceId, ReadingId, Zipcode};
use crate::numeric::{self, Coordinate};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single meter reading as held in the canonical measurement blob.
///
/// `zipcode` and `coordinate` mirror the owning [`DeviceProfile`] and are
/// rewritten by reference cascades; every other field is immutable once
/// the reading is recorded. Readings are deleted only when their device
/// is deregistered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterReading {
    pub id: ReadingId,
    pub device_id: DeviceId,
    #[serde(with = "numeric::plain")]
    pub value: Decimal,
    pub zipcode: Zipcode,
    pub date: NaiveDate,
    pub timestamp: i64,
    pub coordinate: Coordinate,
}

impl MeterReading {
    /// Overwrite the profile-mirrored fields, leaving the measurement
    /// fields untouched.
    pub fn relocate(&mut self, zipcode: Zipcode, coordinate: Coordinate) {
        self.zipcode = zipcode;
        self.coordinate = coordinate;
    }
}

/// Device metadata row; exactly one per registered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub device_id: DeviceId,
    pub zipcode: Zipcode,
    pub coordinate: Coordinate,
}

/// Fan-out payload broadcast after each canonical document write:
/// `{"data": [...]}` with the full reading set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingsSnapshot {
    pub data: Vec<MeterReading>,
}

impl ReadingsSnapshot {
    pub fn new(data: Vec<MeterReading>) -> Self {
        Self { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn make_reading() -> MeterReading {
        MeterReading {
            id: ReadingId::from_uuid("0190a2b4-0000-7000-8000-0000000000aa".parse().unwrap()),
            device_id: DeviceId::new("m-1"),
            value: dec("6.00"),
            zipcode: Zipcode::new("91020"),
            date: NaiveDate::from_ymd_opt(2024, 7, 15).unwrap(),
            timestamp: 1_721_000_000,
            coordinate: Coordinate::pair(dec("34.20"), dec("-118.23")),
        }
    }

    #[test]
    fn test_reading_wire_shape_is_camel_case() {
        let json = serde_json::to_string(&make_reading()).unwrap();
        assert!(json.contains(r#""deviceId":"m-1""#));
        assert!(json.contains(r#""value":6"#));
        assert!(json.contains(r#""date":"2024-07-15""#));
        assert!(json.contains(r#""timestamp":1721000000"#));
        assert!(json.contains(r#""coordinate":[34.2,-118.23]"#));
        assert!(!json.contains("device_id"));
    }

    #[test]
    fn test_reading_round_trip() {
        let reading = make_reading();
        let json = serde_json::to_string(&reading).unwrap();
        let back: MeterReading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }

    #[test]
    fn test_relocate_touches_only_location_fields() {
        let mut reading = make_reading();
        let before = reading.clone();
        reading.relocate(
            Zipcode::new("91214"),
            Coordinate::pair(dec("34.25"), dec("-118.24")),
        );

        assert_eq!(reading.zipcode.as_str(), "91214");
        assert_eq!(reading.id, before.id);
        assert_eq!(reading.value, before.value);
        assert_eq!(reading.date, before.date);
        assert_eq!(reading.timestamp, before.timestamp);
    }

    #[test]
    fn test_profile_round_trip() {
        let profile = DeviceProfile {
            device_id: DeviceId::new("m-9"),
            zipcode: Zipcode::new("90001"),
            coordinate: Coordinate::pair(dec("33.97"), dec("-118.25")),
        };
        let json = serde_json::to_string(&profile).unwrap();
        assert!(json.contains(r#""deviceId":"m-9""#));

        let back: DeviceProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let snapshot = ReadingsSnapshot::new(vec![make_reading()]);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.starts_with(r#"{"data":[{"#));

        let back: ReadingsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
        assert!(!back.is_empty());
    }
}
