//! Storage layer for the meter telemetry sync pipeline
//!
//! Two kinds of state live here: versioned blobs (snapshot documents and
//! rendered artifacts, written conditionally so concurrent writers
//! surface as conflicts) and live record tables whose mutations feed the
//! change-capture outbox that drives the pipeline.
//!
//! # Modules
//! - `blob`: Versioned blob port, write preconditions, etags
//! - `memory`: In-memory blob store
//! - `fs`: Filesystem blob store with atomic writes and sidecar metadata
//! - `tables`: Live measurement/profile tables with change capture

pub mod blob;
pub mod fs;
pub mod memory;
pub mod tables;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::blob::*;
    pub use crate::fs::*;
    pub use crate::memory::*;
    pub use crate::tables::*;
}
