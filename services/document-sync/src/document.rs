//! Canonical measurement document
//!
//! Downstream views are built from a single JSON array of meter
//! readings. This module holds the in-memory form of that array and the
//! rules for applying change events to it under at-least-once delivery.

use serde::{Deserialize, Serialize};
use types::change::{ApplyOutcome, ChangeEvent};
use types::ids::ReadingId;
use types::record::MeterReading;

/// In-memory form of the canonical readings blob.
///
/// Serializes as the bare JSON array the blob holds. Array order is
/// append order; MODIFY rewrites a row in place so positions are stable
/// across updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalDocument {
    readings: Vec<MeterReading>,
}

impl CanonicalDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_readings(readings: Vec<MeterReading>) -> Self {
        Self { readings }
    }

    pub fn readings(&self) -> &[MeterReading] {
        &self.readings
    }

    pub fn into_readings(self) -> Vec<MeterReading> {
        self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn contains(&self, id: &ReadingId) -> bool {
        self.position(id).is_some()
    }

    /// Apply one measurement change event.
    ///
    /// INSERT appends only when the id is absent, so a redelivered batch
    /// cannot double-append. MODIFY and REMOVE match on id and leave the
    /// document untouched when no row matches.
    pub fn apply(&mut self, event: ChangeEvent<MeterReading>) -> ApplyOutcome {
        match event {
            ChangeEvent::Insert { new } => {
                if self.contains(&new.id) {
                    return ApplyOutcome::DuplicateInsert;
                }
                self.readings.push(new);
                ApplyOutcome::Applied
            }
            ChangeEvent::Modify { new } => match self.position(&new.id) {
                Some(index) => {
                    self.readings[index] = new;
                    ApplyOutcome::Applied
                }
                None => ApplyOutcome::MissingTarget,
            },
            ChangeEvent::Remove { old } => match self.position(&old.id) {
                Some(index) => {
                    self.readings.remove(index);
                    ApplyOutcome::Applied
                }
                None => ApplyOutcome::MissingTarget,
            },
        }
    }

    fn position(&self, id: &ReadingId) -> Option<usize> {
        self.readings.iter().position(|reading| reading.id == *id)
    }
}
