//! Types library for the meter telemetry sync pipeline
//!
//! This library provides the type definitions shared across the pipeline
//! services, keeping wire shapes, numeric encoding, and identifier rules
//! in one place.
//!
//! # Modules
//! - `ids`: Unique identifiers (ReadingId, DeviceId, Zipcode)
//! - `numeric`: Plain-number decimal encoding and coordinates
//! - `record`: Measurement and device-profile records
//! - `change`: Change-capture notifications, envelopes, and typed events
//! - `clock`: Time source abstraction

// Public modules
pub mod change;
pub mod clock;
pub mod ids;
pub mod numeric;
pub mod record;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::change::*;
    pub use crate::clock::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::record::*;
}
