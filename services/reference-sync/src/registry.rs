//! Device-profile registry document
//!
//! The reference counterpart of the canonical readings array: a JSON
//! array blob holding at most one profile per device id.

use serde::{Deserialize, Serialize};
use types::change::{ApplyOutcome, ChangeEvent};
use types::ids::DeviceId;
use types::record::DeviceProfile;

/// In-memory form of the device registry blob.
///
/// Serializes as the bare JSON array the blob holds, in registration
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceRegistry {
    profiles: Vec<DeviceProfile>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_profiles(profiles: Vec<DeviceProfile>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &[DeviceProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn profile(&self, device_id: &DeviceId) -> Option<&DeviceProfile> {
        self.position(device_id).map(|index| &self.profiles[index])
    }

    /// Apply one reference change event.
    ///
    /// INSERT appends only when the device has no stored profile, so the
    /// registry never holds two rows for one device. MODIFY and REMOVE
    /// match on device id and leave the registry untouched when no row
    /// matches.
    pub fn apply(&mut self, event: ChangeEvent<DeviceProfile>) -> ApplyOutcome {
        match event {
            ChangeEvent::Insert { new } => {
                if self.position(&new.device_id).is_some() {
                    return ApplyOutcome::DuplicateInsert;
                }
                self.profiles.push(new);
                ApplyOutcome::Applied
            }
            ChangeEvent::Modify { new } => match self.position(&new.device_id) {
                Some(index) => {
                    self.profiles[index] = new;
                    ApplyOutcome::Applied
                }
                None => ApplyOutcome::MissingTarget,
            },
            ChangeEvent::Remove { old } => match self.position(&old.device_id) {
                Some(index) => {
                    self.profiles.remove(index);
                    ApplyOutcome::Applied
                }
                None => ApplyOutcome::MissingTarget,
            },
        }
    }

    fn position(&self, device_id: &DeviceId) -> Option<usize> {
        self.profiles
            .iter()
            .position(|profile| &profile.device_id == device_id)
    }
}
