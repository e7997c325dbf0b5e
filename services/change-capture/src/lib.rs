//! Change Capture Service
//!
//! Watches the live-table outboxes and republishes every measurement
//! mutation as a wire envelope on the ordered relay. The emitter is the
//! only producer on the measurement key, which keeps relay order equal
//! to capture order.

pub mod emitter;

pub use emitter::{ChangeCaptureEmitter, EmitOutcome, EmitterConfig, EmitterReport};
