//! Snapshot resolution for view rebuilds
//!
//! Builders normally render the reading set carried in the fan-out
//! message. A message whose payload is unreadable or empty still
//! triggers a rebuild from the canonical document, so a view never goes
//! stale just because one payload was bad.

use storage::blob::{load_json, BlobStore, StorageError};
use tracing::{debug, warn};
use types::record::{MeterReading, ReadingsSnapshot};

/// Resolve the reading set a rebuild should render.
///
/// Prefers the snapshot embedded in the message body. Falls back to the
/// canonical document blob when the body is unreadable or carries no
/// readings, and to an empty set when that blob is absent too. A
/// malformed canonical blob or a failing store is a dependency error
/// and aborts the rebuild.
pub fn resolve_snapshot(
    body: &str,
    store: &dyn BlobStore,
    document_key: &str,
) -> Result<Vec<MeterReading>, StorageError> {
    match serde_json::from_str::<ReadingsSnapshot>(body) {
        Ok(snapshot) if !snapshot.is_empty() => {
            debug!(readings = snapshot.data.len(), "Rendering snapshot from message payload");
            return Ok(snapshot.data);
        }
        Ok(_) => debug!("Message snapshot empty, reloading canonical document"),
        Err(err) => warn!(error = %err, "Message snapshot unreadable, reloading canonical document"),
    }

    match load_json::<Vec<MeterReading>>(store, document_key)? {
        Some((readings, version)) => {
            debug!(readings = readings.len(), version, "Rendering canonical document");
            Ok(readings)
        }
        None => {
            warn!(key = document_key, "Canonical document absent, rendering empty view");
            Ok(Vec::new())
        }
    }
}
