//! Latest-reading-per-device selection
//!
//! The canonical document accumulates every reading a device ever
//! recorded; rendered views show one row per device. Both builders run
//! their input through [`latest_per_device`] before rendering.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use types::ids::DeviceId;
use types::record::MeterReading;

/// Reduce a reading set to the newest reading per device.
///
/// Newest means the greatest `(timestamp, id)` pair. Reading ids are
/// time-ordered UUIDs, so equal-timestamp ties resolve to the most
/// recently created reading regardless of input order. Output is sorted
/// by device id.
pub fn latest_per_device(readings: Vec<MeterReading>) -> Vec<MeterReading> {
    let mut newest: BTreeMap<DeviceId, MeterReading> = BTreeMap::new();
    for reading in readings {
        match newest.entry(reading.device_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(reading);
            }
            Entry::Occupied(mut slot) => {
                let held = slot.get();
                if (reading.timestamp, reading.id) > (held.timestamp, held.id) {
                    slot.insert(reading);
                }
            }
        }
    }
    newest.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use types::ids::{ReadingId, Zipcode};
    use types::numeric::Coordinate;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn make_reading(suffix: u64, device: &str, timestamp: i64, value: &str) -> MeterReading {
        MeterReading {
            id: ReadingId::from_uuid(
                format!("0190a2b4-0000-7000-8000-{:012x}", suffix)
                    .parse()
                    .unwrap(),
            ),
            device_id: DeviceId::new(device),
            value: dec(value),
            zipcode: Zipcode::new("91020"),
            date: NaiveDate::from_ymd_opt(2024, 7, 15).unwrap(),
            timestamp,
            coordinate: Coordinate::pair(dec("34.21"), dec("-118.23")),
        }
    }

    #[test]
    fn test_latest_reading_wins_per_device() {
        let older = make_reading(1, "A", 100, "5.0");
        let newer = make_reading(2, "A", 200, "6.0");

        let latest = latest_per_device(vec![older, newer.clone()]);

        assert_eq!(latest, vec![newer]);
        assert_eq!(latest[0].value, dec("6.0"));
    }

    #[test]
    fn test_single_reading_passes_through() {
        let reading = make_reading(1, "m-1", 1_721_000_000, "3.5");
        let latest = latest_per_device(vec![reading.clone()]);
        assert_eq!(latest, vec![reading]);
    }

    #[test]
    fn test_equal_timestamp_tie_resolves_to_greater_id() {
        let lo = make_reading(1, "m-1", 500, "1.0");
        let hi = make_reading(2, "m-1", 500, "2.0");

        let forward = latest_per_device(vec![lo.clone(), hi.clone()]);
        let reversed = latest_per_device(vec![hi.clone(), lo]);

        assert_eq!(forward, vec![hi.clone()]);
        assert_eq!(reversed, vec![hi], "tie-break must not depend on input order");
    }

    #[test]
    fn test_each_device_keeps_its_own_latest() {
        let readings = vec![
            make_reading(1, "m-1", 100, "1.0"),
            make_reading(2, "m-2", 900, "9.0"),
            make_reading(3, "m-1", 300, "3.0"),
            make_reading(4, "m-2", 200, "2.0"),
        ];

        let latest = latest_per_device(readings);

        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].device_id.as_str(), "m-1");
        assert_eq!(latest[0].value, dec("3.0"));
        assert_eq!(latest[1].device_id.as_str(), "m-2");
        assert_eq!(latest[1].value, dec("9.0"));
    }

    #[test]
    fn test_output_sorted_by_device() {
        let readings = vec![
            make_reading(1, "m-3", 100, "1.0"),
            make_reading(2, "m-1", 100, "1.0"),
            make_reading(3, "m-2", 100, "1.0"),
        ];

        let devices: Vec<String> = latest_per_device(readings)
            .into_iter()
            .map(|r| r.device_id.as_str().to_string())
            .collect();

        assert_eq!(devices, vec!["m-1", "m-2", "m-3"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(latest_per_device(Vec::new()).is_empty());
    }
}
