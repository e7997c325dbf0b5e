//! Relay consumer that maintains the canonical readings blob
//!
//! One consumer owns the measurement key. Each delivered batch is
//! parsed into typed change events, applied to the loaded document, and
//! written back under a version condition. After a successful write the
//! full reading set is broadcast to every view key. A version conflict
//! re-reads and re-applies; event application is idempotent, so
//! replaying the batch over a fresher document is safe.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use relay::message::{OrderingKey, RelayMessage};
use relay::publisher::RelayPublisher;
use storage::blob::{load_json, store_json, BlobStore, PutCondition, StorageError};
use types::change::{ApplyOutcome, ChangeEvent, Envelope};
use types::record::{MeterReading, ReadingsSnapshot};

use crate::document::CanonicalDocument;

/// Failures that abandon the batch so the relay redelivers it.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("document store failed: {0}")]
    Storage(#[from] StorageError),

    #[error("gave up writing {key} after {attempts} contended attempts")]
    WriteContention { key: String, attempts: u32 },
}

/// Configuration for the document synchronizer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Blob key of the canonical readings array.
    pub document_key: String,
    /// View keys that receive the post-write snapshot.
    pub fanout_keys: Vec<OrderingKey>,
    /// Attempts at the conditional write before the batch is abandoned.
    pub max_put_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            document_key: "readings.json".to_string(),
            fanout_keys: vec![OrderingKey::new("map-view"), OrderingKey::new("report-view")],
            max_put_attempts: 3,
        }
    }
}

/// Per-batch summary of synchronizer work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Events that mutated the document.
    pub applied: usize,
    /// Redelivered inserts dropped by the existence check.
    pub duplicate_inserts: usize,
    /// Modify/remove events whose target row was absent.
    pub missing_targets: usize,
    /// Messages dropped before application.
    pub malformed: usize,
    /// Conditional writes that lost to a concurrent writer.
    pub write_conflicts: u32,
    /// View keys the snapshot could not be published to.
    pub fanout_failures: usize,
    /// Readings in the document after the write.
    pub document_len: usize,
    /// Version the document was written as.
    pub version: u64,
}

/// Maintains the canonical readings document from relay batches.
pub struct DocumentSynchronizer {
    store: Arc<dyn BlobStore>,
    relay: Arc<dyn RelayPublisher>,
    config: SyncConfig,
    /// Total events applied since creation.
    events_applied: u64,
    /// Total malformed messages dropped since creation.
    messages_skipped: u64,
    /// Total write conflicts encountered since creation.
    write_conflicts: u64,
    /// Total snapshot publishes rejected since creation.
    fanout_failures: u64,
}

impl DocumentSynchronizer {
    /// Create a synchronizer with the given configuration.
    pub fn new(
        store: Arc<dyn BlobStore>,
        relay: Arc<dyn RelayPublisher>,
        config: SyncConfig,
    ) -> Self {
        info!(
            document_key = %config.document_key,
            fanout_keys = config.fanout_keys.len(),
            "DocumentSynchronizer initialized"
        );
        Self {
            store,
            relay,
            config,
            events_applied: 0,
            messages_skipped: 0,
            write_conflicts: 0,
            fanout_failures: 0,
        }
    }

    /// Create a synchronizer with default configuration.
    pub fn with_defaults(store: Arc<dyn BlobStore>, relay: Arc<dyn RelayPublisher>) -> Self {
        Self::new(store, relay, SyncConfig::default())
    }

    /// Apply one delivered batch to the canonical document.
    ///
    /// Returns an error only on dependency failure; the caller must then
    /// leave the batch uncommitted so it is delivered again.
    pub fn synchronize(&mut self, batch: &[RelayMessage]) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        if batch.is_empty() {
            return Ok(report);
        }

        let events = self.parse_batch(batch, &mut report);

        let document = self.apply_and_store(&events, &mut report)?;

        let snapshot = ReadingsSnapshot::new(document.into_readings());
        self.broadcast(&snapshot, &mut report);

        debug!(
            applied = report.applied,
            duplicates = report.duplicate_inserts,
            missing = report.missing_targets,
            malformed = report.malformed,
            version = report.version,
            readings = report.document_len,
            "Synchronized document"
        );
        Ok(report)
    }

    /// Total events applied since creation.
    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    /// Total malformed messages dropped since creation.
    pub fn messages_skipped(&self) -> u64 {
        self.messages_skipped
    }

    /// Total write conflicts encountered since creation.
    pub fn write_conflicts(&self) -> u64 {
        self.write_conflicts
    }

    /// Total snapshot publishes rejected since creation.
    pub fn fanout_failures(&self) -> u64 {
        self.fanout_failures
    }

    /// Parse relay messages into typed events, dropping the malformed.
    fn parse_batch(
        &mut self,
        batch: &[RelayMessage],
        report: &mut SyncReport,
    ) -> Vec<ChangeEvent<MeterReading>> {
        let mut events = Vec::with_capacity(batch.len());
        for message in batch {
            let envelope: Envelope<MeterReading> = match serde_json::from_str(&message.body) {
                Ok(envelope) => envelope,
                Err(err) => {
                    report.malformed += 1;
                    self.messages_skipped += 1;
                    warn!(
                        sequence = message.sequence,
                        error = %err,
                        "Skipping unparseable envelope"
                    );
                    continue;
                }
            };
            match ChangeEvent::try_from(envelope) {
                Ok(event) => events.push(event),
                Err(err) => {
                    report.malformed += 1;
                    self.messages_skipped += 1;
                    warn!(
                        sequence = message.sequence,
                        error = %err,
                        "Skipping envelope without its payload"
                    );
                }
            }
        }
        events
    }

    /// Load, apply, and conditionally write the document, retrying on
    /// version conflicts.
    fn apply_and_store(
        &mut self,
        events: &[ChangeEvent<MeterReading>],
        report: &mut SyncReport,
    ) -> Result<CanonicalDocument, SyncError> {
        let key = self.config.document_key.clone();

        for attempt in 1..=self.config.max_put_attempts {
            let (mut document, condition) =
                match load_json::<CanonicalDocument>(self.store.as_ref(), &key)? {
                    Some((document, version)) => (document, PutCondition::IfVersion(version)),
                    None => (CanonicalDocument::new(), PutCondition::IfAbsent),
                };

            let mut applied = 0usize;
            let mut duplicates = 0usize;
            let mut missing = 0usize;
            for event in events {
                let operation = event.operation();
                match document.apply(event.clone()) {
                    ApplyOutcome::Applied => applied += 1,
                    ApplyOutcome::DuplicateInsert => {
                        duplicates += 1;
                        debug!(operation = %operation, "Insert id already stored, keeping row");
                    }
                    ApplyOutcome::MissingTarget => {
                        missing += 1;
                        debug!(operation = %operation, "No stored row for event target");
                    }
                }
            }

            match store_json(self.store.as_ref(), &key, &document, condition) {
                Ok(version) => {
                    report.applied = applied;
                    report.duplicate_inserts = duplicates;
                    report.missing_targets = missing;
                    report.document_len = document.len();
                    report.version = version;
                    self.events_applied += applied as u64;
                    return Ok(document);
                }
                Err(err) if err.is_conflict() => {
                    report.write_conflicts += 1;
                    self.write_conflicts += 1;
                    warn!(
                        key = %key,
                        attempt,
                        error = %err,
                        "Document moved under us, re-reading"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(SyncError::WriteContention {
            key,
            attempts: self.config.max_put_attempts,
        })
    }

    /// Publish the snapshot to every view key, tolerating partial failure.
    fn broadcast(&mut self, snapshot: &ReadingsSnapshot, report: &mut SyncReport) {
        let body = match serde_json::to_string(snapshot) {
            Ok(body) => body,
            Err(err) => {
                report.fanout_failures += self.config.fanout_keys.len();
                self.fanout_failures += self.config.fanout_keys.len() as u64;
                error!(error = %err, "Snapshot failed to serialize, views not notified");
                return;
            }
        };

        for key in &self.config.fanout_keys {
            match self.relay.publish(key, body.clone()) {
                Ok(sequence) => {
                    debug!(key = %key, sequence, "Published view snapshot");
                }
                Err(err) => {
                    report.fanout_failures += 1;
                    self.fanout_failures += 1;
                    error!(key = %key, error = %err, "View snapshot publish failed");
                }
            }
        }
    }
}
