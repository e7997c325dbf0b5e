//! Live record tables with change capture
//!
//! The writable source of truth for readings and device profiles. Every
//! mutation is recorded as a [`ChangeNotification`] in a drainable
//! outbox, the table-stream analog: a put over an existing key reports
//! MODIFY with both row images, a fresh put reports INSERT, and a delete
//! reports REMOVE with the old image. Cascade writes re-enter the
//! pipeline through the same outbox, which serializes their effect on
//! the canonical snapshot with ordinary measurement traffic.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tracing::debug;
use types::change::{ChangeNotification, SourceStream};
use types::ids::{DeviceId, ReadingId, Zipcode};
use types::numeric::Coordinate;
use types::record::{DeviceProfile, MeterReading};

use crate::blob::StorageError;

// ── Ports ───────────────────────────────────────────────────────────

/// Live measurement table
pub trait MeterStore: Send + Sync {
    /// Insert or replace a reading keyed by its id
    fn put_reading(&self, reading: MeterReading) -> Result<(), StorageError>;

    /// Readings owned by a device, in id order
    fn readings_for_device(&self, device_id: &DeviceId)
        -> Result<Vec<MeterReading>, StorageError>;

    /// Cascade delete: remove every reading owned by the device,
    /// returning how many were removed
    fn delete_readings_for_device(&self, device_id: &DeviceId) -> Result<usize, StorageError>;

    /// Cascade update: overwrite the location fields on every reading
    /// owned by the device, returning how many were rewritten
    fn relocate_readings_for_device(
        &self,
        device_id: &DeviceId,
        zipcode: &Zipcode,
        coordinate: &Coordinate,
    ) -> Result<usize, StorageError>;

    /// Change notifications accumulated since the last drain
    fn drain_changes(&self) -> Result<Vec<ChangeNotification>, StorageError>;
}

/// Live device-profile table
pub trait DeviceStore: Send + Sync {
    /// Profile for a device, or None when unregistered
    fn profile(&self, device_id: &DeviceId) -> Result<Option<DeviceProfile>, StorageError>;

    /// Insert or replace a profile keyed by its device id
    fn put_profile(&self, profile: DeviceProfile) -> Result<(), StorageError>;

    /// Remove a profile, returning it if it existed
    fn remove_profile(&self, device_id: &DeviceId)
        -> Result<Option<DeviceProfile>, StorageError>;

    /// Change notifications accumulated since the last drain
    fn drain_changes(&self) -> Result<Vec<ChangeNotification>, StorageError>;
}

fn to_image<T: serde::Serialize>(record: &T) -> Result<Value, StorageError> {
    serde_json::to_value(record).map_err(|e| StorageError::Serialization(e.to_string()))
}

// ── In-memory measurement table ─────────────────────────────────────

#[derive(Default)]
struct MeterTableState {
    rows: BTreeMap<ReadingId, MeterReading>,
    outbox: Vec<ChangeNotification>,
}

/// Measurement table backed by a process-local map
///
/// Uses BTreeMap keyed by reading id, so iteration follows the
/// time-sortable id order.
#[derive(Default)]
pub struct InMemoryMeterStore {
    state: Mutex<MeterTableState>,
}

impl InMemoryMeterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MeterTableState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::Unavailable {
            reason: "measurement table mutex poisoned".to_string(),
        })
    }
}

impl MeterStore for InMemoryMeterStore {
    fn put_reading(&self, reading: MeterReading) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let new_image = to_image(&reading)?;
        let id = reading.id;
        match state.rows.insert(id, reading) {
            Some(previous) => {
                let old_image = to_image(&previous)?;
                state.outbox.push(ChangeNotification::modify(
                    SourceStream::Measurement,
                    new_image,
                    old_image,
                ));
            }
            None => {
                state
                    .outbox
                    .push(ChangeNotification::insert(SourceStream::Measurement, new_image));
            }
        }
        Ok(())
    }

    fn readings_for_device(
        &self,
        device_id: &DeviceId,
    ) -> Result<Vec<MeterReading>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .rows
            .values()
            .filter(|reading| &reading.device_id == device_id)
            .cloned()
            .collect())
    }

    fn delete_readings_for_device(&self, device_id: &DeviceId) -> Result<usize, StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let doomed: Vec<ReadingId> = state
            .rows
            .values()
            .filter(|reading| &reading.device_id == device_id)
            .map(|reading| reading.id)
            .collect();

        for id in &doomed {
            if let Some(previous) = state.rows.remove(id) {
                let old_image = to_image(&previous)?;
                state
                    .outbox
                    .push(ChangeNotification::remove(SourceStream::Measurement, old_image));
            }
        }

        debug!(
            device = device_id.as_str(),
            removed = doomed.len(),
            "Cascade-deleted readings"
        );
        Ok(doomed.len())
    }

    fn relocate_readings_for_device(
        &self,
        device_id: &DeviceId,
        zipcode: &Zipcode,
        coordinate: &Coordinate,
    ) -> Result<usize, StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let targets: Vec<ReadingId> = state
            .rows
            .values()
            .filter(|reading| &reading.device_id == device_id)
            .map(|reading| reading.id)
            .collect();

        for id in &targets {
            if let Some(row) = state.rows.get_mut(id) {
                let old_image = to_image(row)?;
                row.relocate(zipcode.clone(), coordinate.clone());
                let new_image = to_image(row)?;
                state.outbox.push(ChangeNotification::modify(
                    SourceStream::Measurement,
                    new_image,
                    old_image,
                ));
            }
        }

        debug!(
            device = device_id.as_str(),
            rewritten = targets.len(),
            "Cascade-relocated readings"
        );
        Ok(targets.len())
    }

    fn drain_changes(&self) -> Result<Vec<ChangeNotification>, StorageError> {
        let mut guard = self.lock()?;
        let mut drained = Vec::new();
        std::mem::swap(&mut drained, &mut guard.outbox);
        Ok(drained)
    }
}

// ── In-memory device-profile table ──────────────────────────────────

#[derive(Default)]
struct DeviceTableState {
    rows: BTreeMap<DeviceId, DeviceProfile>,
    outbox: Vec<ChangeNotification>,
}

/// Device-profile table backed by a process-local map
#[derive(Default)]
pub struct InMemoryDeviceStore {
    state: Mutex<DeviceTableState>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, DeviceTableState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::Unavailable {
            reason: "device table mutex poisoned".to_string(),
        })
    }
}

impl DeviceStore for InMemoryDeviceStore {
    fn profile(&self, device_id: &DeviceId) -> Result<Option<DeviceProfile>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.rows.get(device_id).cloned())
    }

    fn put_profile(&self, profile: DeviceProfile) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let new_image = to_image(&profile)?;
        let key = profile.device_id.clone();
        match state.rows.insert(key, profile) {
            Some(previous) => {
                let old_image = to_image(&previous)?;
                state.outbox.push(ChangeNotification::modify(
                    SourceStream::Reference,
                    new_image,
                    old_image,
                ));
            }
            None => {
                state
                    .outbox
                    .push(ChangeNotification::insert(SourceStream::Reference, new_image));
            }
        }
        Ok(())
    }

    fn remove_profile(
        &self,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceProfile>, StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let removed = state.rows.remove(device_id);
        if let Some(previous) = &removed {
            let old_image = to_image(previous)?;
            state
                .outbox
                .push(ChangeNotification::remove(SourceStream::Reference, old_image));
        }
        Ok(removed)
    }

    fn drain_changes(&self) -> Result<Vec<ChangeNotification>, StorageError> {
        let mut guard = self.lock()?;
        let mut drained = Vec::new();
        std::mem::swap(&mut drained, &mut guard.outbox);
        Ok(drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use types::change::Operation;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn make_reading(suffix: u32, device: &str) -> MeterReading {
        let uuid = format!("0190a2b4-0000-7000-8000-{:012x}", suffix);
        MeterReading {
            id: ReadingId::from_uuid(uuid.parse().unwrap()),
            device_id: DeviceId::new(device),
            value: dec("5.0"),
            zipcode: Zipcode::new("91020"),
            date: NaiveDate::from_ymd_opt(2024, 7, 15).unwrap(),
            timestamp: 1_721_000_000 + suffix as i64,
            coordinate: Coordinate::pair(dec("34.2"), dec("-118.23")),
        }
    }

    fn make_profile(device: &str, zip: &str) -> DeviceProfile {
        DeviceProfile {
            device_id: DeviceId::new(device),
            zipcode: Zipcode::new(zip),
            coordinate: Coordinate::pair(dec("34.2"), dec("-118.23")),
        }
    }

    #[test]
    fn test_put_reading_reports_insert_then_modify() {
        let store = InMemoryMeterStore::new();
        let reading = make_reading(1, "m-1");

        store.put_reading(reading.clone()).unwrap();
        let mut updated = reading.clone();
        updated.value = dec("6.0");
        store.put_reading(updated).unwrap();

        let changes = store.drain_changes().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].operation, Operation::Insert);
        assert!(changes[0].old_image.is_none());
        assert_eq!(changes[1].operation, Operation::Modify);
        assert!(changes[1].old_image.is_some());
        assert!(changes.iter().all(|c| c.source == SourceStream::Measurement));
    }

    #[test]
    fn test_drain_empties_outbox() {
        let store = InMemoryMeterStore::new();
        store.put_reading(make_reading(1, "m-1")).unwrap();

        assert_eq!(store.drain_changes().unwrap().len(), 1);
        assert!(store.drain_changes().unwrap().is_empty());
    }

    #[test]
    fn test_cascade_delete_targets_one_device() {
        let store = InMemoryMeterStore::new();
        store.put_reading(make_reading(1, "m-1")).unwrap();
        store.put_reading(make_reading(2, "m-1")).unwrap();
        store.put_reading(make_reading(3, "m-2")).unwrap();
        store.drain_changes().unwrap();

        let removed = store.delete_readings_for_device(&DeviceId::new("m-1")).unwrap();
        assert_eq!(removed, 2);
        assert!(store.readings_for_device(&DeviceId::new("m-1")).unwrap().is_empty());
        assert_eq!(store.readings_for_device(&DeviceId::new("m-2")).unwrap().len(), 1);

        let changes = store.drain_changes().unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.operation == Operation::Remove));
    }

    #[test]
    fn test_cascade_relocate_rewrites_location_only() {
        let store = InMemoryMeterStore::new();
        let reading = make_reading(1, "m-1");
        store.put_reading(reading.clone()).unwrap();
        store.drain_changes().unwrap();

        let rewritten = store
            .relocate_readings_for_device(
                &DeviceId::new("m-1"),
                &Zipcode::new("91214"),
                &Coordinate::pair(dec("34.25"), dec("-118.24")),
            )
            .unwrap();
        assert_eq!(rewritten, 1);

        let rows = store.readings_for_device(&DeviceId::new("m-1")).unwrap();
        assert_eq!(rows[0].zipcode.as_str(), "91214");
        assert_eq!(rows[0].value, reading.value);
        assert_eq!(rows[0].date, reading.date);
        assert_eq!(rows[0].timestamp, reading.timestamp);

        let changes = store.drain_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].operation, Operation::Modify);
    }

    #[test]
    fn test_profile_lifecycle_notifications() {
        let store = InMemoryDeviceStore::new();
        let device = DeviceId::new("m-1");

        store.put_profile(make_profile("m-1", "91020")).unwrap();
        store.put_profile(make_profile("m-1", "91214")).unwrap();
        let removed = store.remove_profile(&device).unwrap();
        assert_eq!(removed.unwrap().zipcode.as_str(), "91214");

        let operations: Vec<Operation> = store
            .drain_changes()
            .unwrap()
            .iter()
            .map(|c| c.operation)
            .collect();
        assert_eq!(
            operations,
            vec![Operation::Insert, Operation::Modify, Operation::Remove]
        );
    }

    #[test]
    fn test_remove_absent_profile_is_silent() {
        let store = InMemoryDeviceStore::new();
        assert!(store.remove_profile(&DeviceId::new("ghost")).unwrap().is_none());
        assert!(store.drain_changes().unwrap().is_empty());
    }
}
