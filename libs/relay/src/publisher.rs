//! Publish seam and relay errors

use crate::message::OrderingKey;
use thiserror::Error;

/// Relay failures surfaced to producers and consumers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("ordering key {key} is at capacity ({capacity} messages)")]
    KeyAtCapacity { key: String, capacity: usize },

    #[error("relay rejected publish to {key}: {reason}")]
    PublishRejected { key: String, reason: String },

    #[error("relay unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Producer-side publish port
///
/// Components that only publish depend on this trait, so tests can swap
/// in destinations that fail on demand.
pub trait RelayPublisher: Send + Sync {
    /// Append a message to the key's queue, returning its sequence
    fn publish(&self, key: &OrderingKey, body: String) -> Result<u64, RelayError>;
}
