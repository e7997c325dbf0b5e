//! Reference Sync Service
//!
//! Consumes device-profile change notifications directly from the
//! reference outbox, keeps the registry blob current, and cascades
//! profile removals and relocations into the live measurement store.

pub mod registry;
pub mod synchronizer;

pub use registry::ReferenceRegistry;
pub use synchronizer::{ReferenceConfig, ReferenceError, ReferenceReport, ReferenceSynchronizer};
