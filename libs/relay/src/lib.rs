//! Ordered message relay for the meter telemetry sync pipeline
//!
//! A relay is a set of named FIFO queues ("ordering keys"). Producers
//! publish serialized payloads; consumers peek a batch, process it, and
//! commit on success. Uncommitted batches are redelivered, which gives
//! the pipeline its at-least-once delivery contract.
//!
//! # Modules
//! - `message`: Ordering keys and delivered messages
//! - `publisher`: The publish port and relay error taxonomy
//! - `memory`: In-process relay used by the pipeline harness and tests

pub mod memory;
pub mod message;
pub mod publisher;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::memory::*;
    pub use crate::message::*;
    pub use crate::publisher::*;
}
