//! Document Sync Service
//!
//! Sole consumer of the measurement ordering key. Folds change
//! envelopes into the canonical readings blob under conditional writes,
//! then broadcasts the full reading set to the view keys after every
//! successful write.

pub mod document;
pub mod synchronizer;

pub use document::CanonicalDocument;
pub use synchronizer::{DocumentSynchronizer, SyncConfig, SyncError, SyncReport};
