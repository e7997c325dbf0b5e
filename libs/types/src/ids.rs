//! Unique identifier types for pipeline entities
//!
//! Reading IDs use UUID v7 for time-sortable ordering, so equal-timestamp
//! deduplication ties resolve to the most recently created reading.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a meter reading
///
/// Uses UUID v7 for time-based sorting. Readings can be compared in
/// creation order using the embedded timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingId(Uuid);

impl ReadingId {
    /// Create a new ReadingId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReadingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device serial number, the owner key shared by readings and profiles
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new DeviceId from a serial number string
    ///
    /// # Panics
    /// Panics if the serial number is empty
    pub fn new(serial: impl Into<String>) -> Self {
        let s = serial.into();
        assert!(!s.is_empty(), "DeviceId must not be empty");
        Self(s)
    }

    /// Try to create a DeviceId, returning None if empty
    pub fn try_new(serial: impl Into<String>) -> Option<Self> {
        let s = serial.into();
        if s.is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    /// Get the serial number string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Five-digit postal code carried on profiles and mirrored onto readings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Zipcode(String);

impl Zipcode {
    /// Create a new Zipcode
    ///
    /// # Panics
    /// Panics if the value is not exactly five ASCII digits
    pub fn new(code: impl Into<String>) -> Self {
        let s = code.into();
        assert!(Self::is_valid(&s), "Zipcode must be five ASCII digits");
        Self(s)
    }

    /// Try to create a Zipcode, returning None if invalid
    pub fn try_new(code: impl Into<String>) -> Option<Self> {
        let s = code.into();
        if Self::is_valid(&s) {
            Some(Self(s))
        } else {
            None
        }
    }

    /// Check the five-ASCII-digit format
    pub fn is_valid(code: &str) -> bool {
        code.len() == 5 && code.bytes().all(|b| b.is_ascii_digit())
    }

    /// Get the code string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Zipcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Zipcode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_id_creation() {
        let id1 = ReadingId::new();
        let id2 = ReadingId::new();
        assert_ne!(id1, id2, "ReadingIds should be unique");
    }

    #[test]
    fn test_reading_id_serialization() {
        let id = ReadingId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: ReadingId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_reading_id_orders_by_uuid_bytes() {
        let lo = ReadingId::from_uuid("00000000-0000-7000-8000-000000000001".parse().unwrap());
        let hi = ReadingId::from_uuid("00000000-0000-7000-8000-000000000002".parse().unwrap());
        assert!(lo < hi);
    }

    #[test]
    fn test_device_id_creation() {
        let device = DeviceId::new("water-meter-001");
        assert_eq!(device.as_str(), "water-meter-001");
    }

    #[test]
    fn test_device_id_try_new() {
        assert!(DeviceId::try_new("m-1").is_some());
        assert!(DeviceId::try_new("").is_none());
    }

    #[test]
    #[should_panic(expected = "DeviceId must not be empty")]
    fn test_device_id_empty() {
        DeviceId::new("");
    }

    #[test]
    fn test_device_id_serialization() {
        let device = DeviceId::new("m-42");
        let json = serde_json::to_string(&device).unwrap();
        assert_eq!(json, "\"m-42\"");

        let deserialized: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(device, deserialized);
    }

    #[test]
    fn test_zipcode_validation() {
        assert!(Zipcode::try_new("91020").is_some());
        assert!(Zipcode::try_new("9102").is_none());
        assert!(Zipcode::try_new("910200").is_none());
        assert!(Zipcode::try_new("91a20").is_none());
    }

    #[test]
    #[should_panic(expected = "Zipcode must be five ASCII digits")]
    fn test_zipcode_invalid_format() {
        Zipcode::new("ABCDE");
    }

    #[test]
    fn test_zipcode_serialization() {
        let zip = Zipcode::new("91214");
        let json = serde_json::to_string(&zip).unwrap();
        assert_eq!(json, "\"91214\"");
    }
}
