//! Registration and reading ingestion
//!
//! Validates raw registration and reading submissions, then writes the
//! accepted records through the live tables. Table outboxes turn every
//! accepted write into the change notifications the pipeline consumes,
//! so nothing here talks to the relay directly.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use storage::blob::StorageError;
use storage::tables::{DeviceStore, MeterStore};
use thiserror::Error;
use tracing::{debug, info};
use types::clock::Clock;
use types::ids::{DeviceId, ReadingId, Zipcode};
use types::numeric::Coordinate;
use types::record::{DeviceProfile, MeterReading};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("device {device} is already registered")]
    DuplicateDevice { device: String },

    #[error("device {device} is not registered")]
    UnknownDevice { device: String },

    #[error("device id must not be empty")]
    EmptyDevice,

    #[error("invalid zipcode {given:?}, expected five digits")]
    InvalidZipcode { given: String },

    #[error("invalid date {given:?}, expected YYYY-MM-DD")]
    InvalidDate { given: String },

    #[error("invalid meter value {given:?}: {reason}")]
    InvalidValue { given: String, reason: &'static str },

    #[error("invalid coordinate: expected [lat, lon], got {arity} parts")]
    InvalidCoordinate { arity: usize },

    #[error(transparent)]
    Store(#[from] StorageError),
}

/// Raw registration submission, validated before anything is written
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub device_id: String,
    pub value: String,
    pub zipcode: String,
    pub date: String,
    pub coordinate: Vec<Decimal>,
}

/// Raw reading submission for an already-registered device
#[derive(Debug, Clone)]
pub struct ReadingRequest {
    pub device_id: String,
    pub value: String,
    pub date: String,
}

/// Records written by a successful registration
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub profile: DeviceProfile,
    pub seed_reading: MeterReading,
}

/// Front door for device registrations and meter readings
pub struct IngestService {
    devices: Arc<dyn DeviceStore>,
    meters: Arc<dyn MeterStore>,
    clock: Arc<dyn Clock>,
    devices_registered: u64,
    readings_recorded: u64,
}

impl IngestService {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        meters: Arc<dyn MeterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!("Ingest service initialized");
        Self {
            devices,
            meters,
            clock,
            devices_registered: 0,
            readings_recorded: 0,
        }
    }

    /// Register a device and record its first reading.
    ///
    /// The duplicate check runs before field validation, so re-submitting
    /// a registration reports the conflict rather than a field error.
    pub fn register_device(
        &mut self,
        request: RegistrationRequest,
    ) -> Result<Registration, IngestError> {
        let device_id = parse_device_id(&request.device_id)?;
        if self.devices.profile(&device_id)?.is_some() {
            return Err(IngestError::DuplicateDevice {
                device: device_id.as_str().to_string(),
            });
        }

        let zipcode = parse_zipcode(&request.zipcode)?;
        let date = parse_date(&request.date)?;
        let value = parse_value(&request.value)?;
        let coordinate = parse_coordinate(&request.coordinate)?;

        let profile = DeviceProfile {
            device_id: device_id.clone(),
            zipcode: zipcode.clone(),
            coordinate: coordinate.clone(),
        };
        self.devices.put_profile(profile.clone())?;

        let seed_reading = MeterReading {
            id: ReadingId::new(),
            device_id,
            value,
            zipcode,
            date,
            timestamp: self.clock.now(),
            coordinate,
        };
        self.meters.put_reading(seed_reading.clone())?;
        self.devices_registered += 1;

        info!(device = profile.device_id.as_str(), "Registered device");
        Ok(Registration {
            profile,
            seed_reading,
        })
    }

    /// Record a reading for a registered device.
    ///
    /// Location fields come from the owning profile, never from the
    /// submission, so readings always carry the registry's view of where
    /// the device sits.
    pub fn record_reading(&mut self, request: ReadingRequest) -> Result<MeterReading, IngestError> {
        let device_id = parse_device_id(&request.device_id)?;
        let profile = self
            .devices
            .profile(&device_id)?
            .ok_or_else(|| IngestError::UnknownDevice {
                device: device_id.as_str().to_string(),
            })?;

        let value = parse_value(&request.value)?;
        let date = parse_date(&request.date)?;

        let reading = MeterReading {
            id: ReadingId::new(),
            device_id,
            value,
            zipcode: profile.zipcode,
            date,
            timestamp: self.clock.now(),
            coordinate: profile.coordinate,
        };
        self.meters.put_reading(reading.clone())?;
        self.readings_recorded += 1;

        debug!(device = reading.device_id.as_str(), "Recorded reading");
        Ok(reading)
    }

    /// Move a device, producing the reference MODIFY that drives the
    /// relocation cascade.
    pub fn update_device_location(
        &mut self,
        device_id: &str,
        zipcode: &str,
        coordinate: Vec<Decimal>,
    ) -> Result<DeviceProfile, IngestError> {
        let device_id = parse_device_id(device_id)?;
        let current = self
            .devices
            .profile(&device_id)?
            .ok_or_else(|| IngestError::UnknownDevice {
                device: device_id.as_str().to_string(),
            })?;

        let updated = DeviceProfile {
            device_id: current.device_id,
            zipcode: parse_zipcode(zipcode)?,
            coordinate: parse_coordinate(&coordinate)?,
        };
        self.devices.put_profile(updated.clone())?;

        info!(
            device = updated.device_id.as_str(),
            zipcode = updated.zipcode.as_str(),
            "Updated device location"
        );
        Ok(updated)
    }

    /// Retire a device, producing the reference REMOVE that drives the
    /// reading-deletion cascade.
    pub fn deregister_device(&mut self, device_id: &str) -> Result<DeviceProfile, IngestError> {
        let device_id = parse_device_id(device_id)?;
        let removed = self
            .devices
            .remove_profile(&device_id)?
            .ok_or_else(|| IngestError::UnknownDevice {
                device: device_id.as_str().to_string(),
            })?;

        info!(device = device_id.as_str(), "Deregistered device");
        Ok(removed)
    }

    /// Devices registered over this service's lifetime
    pub fn devices_registered(&self) -> u64 {
        self.devices_registered
    }

    /// Readings recorded over this service's lifetime, seed readings
    /// excluded
    pub fn readings_recorded(&self) -> u64 {
        self.readings_recorded
    }
}

fn parse_device_id(given: &str) -> Result<DeviceId, IngestError> {
    DeviceId::try_new(given).ok_or(IngestError::EmptyDevice)
}

fn parse_zipcode(given: &str) -> Result<Zipcode, IngestError> {
    Zipcode::try_new(given).ok_or_else(|| IngestError::InvalidZipcode {
        given: given.to_string(),
    })
}

fn parse_date(given: &str) -> Result<NaiveDate, IngestError> {
    NaiveDate::parse_from_str(given, "%Y-%m-%d").map_err(|_| IngestError::InvalidDate {
        given: given.to_string(),
    })
}

fn parse_value(given: &str) -> Result<Decimal, IngestError> {
    let trimmed = given.trim();
    let value = Decimal::from_str_exact(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| IngestError::InvalidValue {
            given: given.to_string(),
            reason: "not a decimal number",
        })?;
    if value <= Decimal::ZERO {
        return Err(IngestError::InvalidValue {
            given: given.to_string(),
            reason: "must be positive",
        });
    }
    Ok(value)
}

fn parse_coordinate(parts: &[Decimal]) -> Result<Coordinate, IngestError> {
    match parts {
        [lat, lon] => Ok(Coordinate::pair(*lat, *lon)),
        _ => Err(IngestError::InvalidCoordinate { arity: parts.len() }),
    }
}
