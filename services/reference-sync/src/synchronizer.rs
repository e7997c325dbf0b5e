//! Direct consumer of reference-table change notifications
//!
//! Keeps the device registry blob current and cascades owner changes
//! into the live measurement store. Cascade writes go through the
//! store's change capture, so their effect on the canonical document
//! arrives as ordinary traffic on the measurement ordering key instead
//! of racing the document synchronizer.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use storage::blob::{load_json, store_json, BlobStore, PutCondition, StorageError};
use storage::tables::MeterStore;
use types::change::{ApplyOutcome, ChangeEvent, ChangeNotification, SourceStream};
use types::record::DeviceProfile;

use crate::registry::ReferenceRegistry;

/// Failures that abandon the batch so the caller redelivers it.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("registry store failed: {0}")]
    Storage(#[from] StorageError),

    #[error("gave up writing {key} after {attempts} contended attempts")]
    WriteContention { key: String, attempts: u32 },
}

/// Configuration for the reference synchronizer.
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    /// Blob key of the device registry array.
    pub registry_key: String,
    /// Attempts at the conditional write before the batch is abandoned.
    pub max_put_attempts: u32,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            registry_key: "devices.json".to_string(),
            max_put_attempts: 3,
        }
    }
}

/// Per-batch summary of reference work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceReport {
    /// Events that mutated the registry.
    pub applied: usize,
    /// Registration inserts dropped because the device already exists.
    pub duplicate_inserts: usize,
    /// Modify/remove events whose profile was absent.
    pub missing_targets: usize,
    /// Notifications dropped before application.
    pub malformed: usize,
    /// Conditional writes that lost to a concurrent writer.
    pub write_conflicts: u32,
    /// Readings removed by cascade deletes.
    pub readings_deleted: usize,
    /// Readings rewritten by cascade relocations.
    pub readings_relocated: usize,
    /// Cascades that failed against the measurement store.
    pub cascade_failures: usize,
    /// Profiles in the registry after the write.
    pub registry_len: usize,
    /// Version the registry was written as.
    pub version: u64,
}

/// Applies reference changes to the registry blob and cascades them
/// into the measurement table.
pub struct ReferenceSynchronizer {
    store: Arc<dyn BlobStore>,
    meters: Arc<dyn MeterStore>,
    config: ReferenceConfig,
    /// Total events applied since creation.
    events_applied: u64,
    /// Total malformed notifications dropped since creation.
    notifications_skipped: u64,
    /// Total write conflicts encountered since creation.
    write_conflicts: u64,
    /// Total cascade failures since creation.
    cascade_failures: u64,
}

impl ReferenceSynchronizer {
    /// Create a synchronizer with the given configuration.
    pub fn new(
        store: Arc<dyn BlobStore>,
        meters: Arc<dyn MeterStore>,
        config: ReferenceConfig,
    ) -> Self {
        info!(registry_key = %config.registry_key, "ReferenceSynchronizer initialized");
        Self {
            store,
            meters,
            config,
            events_applied: 0,
            notifications_skipped: 0,
            write_conflicts: 0,
            cascade_failures: 0,
        }
    }

    /// Create a synchronizer with default configuration.
    pub fn with_defaults(store: Arc<dyn BlobStore>, meters: Arc<dyn MeterStore>) -> Self {
        Self::new(store, meters, ReferenceConfig::default())
    }

    /// Apply one drained batch of reference notifications.
    ///
    /// The registry write lands before any cascade runs, so a cascade
    /// failure never leaves the registry behind the notifications that
    /// were acknowledged.
    pub fn synchronize(
        &mut self,
        notifications: Vec<ChangeNotification>,
    ) -> Result<ReferenceReport, ReferenceError> {
        let mut report = ReferenceReport::default();
        if notifications.is_empty() {
            return Ok(report);
        }

        let events = self.parse_batch(notifications, &mut report);

        self.apply_and_store(&events, &mut report)?;

        self.cascade(&events, &mut report);

        debug!(
            applied = report.applied,
            duplicates = report.duplicate_inserts,
            missing = report.missing_targets,
            malformed = report.malformed,
            deleted = report.readings_deleted,
            relocated = report.readings_relocated,
            version = report.version,
            "Synchronized device registry"
        );
        Ok(report)
    }

    /// Total events applied since creation.
    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    /// Total malformed notifications dropped since creation.
    pub fn notifications_skipped(&self) -> u64 {
        self.notifications_skipped
    }

    /// Total write conflicts encountered since creation.
    pub fn write_conflicts(&self) -> u64 {
        self.write_conflicts
    }

    /// Total cascade failures since creation.
    pub fn cascade_failures(&self) -> u64 {
        self.cascade_failures
    }

    /// Parse notifications into typed events, dropping the malformed.
    fn parse_batch(
        &mut self,
        notifications: Vec<ChangeNotification>,
        report: &mut ReferenceReport,
    ) -> Vec<ChangeEvent<DeviceProfile>> {
        let mut events = Vec::with_capacity(notifications.len());
        for notification in notifications {
            if notification.source != SourceStream::Reference {
                report.malformed += 1;
                self.notifications_skipped += 1;
                warn!(
                    source = %notification.source,
                    operation = %notification.operation,
                    "Dropping notification from unexpected source stream"
                );
                continue;
            }

            let operation = notification.operation;
            let envelope = match notification.into_envelope::<DeviceProfile>() {
                Ok(envelope) => envelope,
                Err(err) => {
                    report.malformed += 1;
                    self.notifications_skipped += 1;
                    warn!(
                        operation = %operation,
                        error = %err,
                        "Dropping notification with unreadable profile image"
                    );
                    continue;
                }
            };
            match ChangeEvent::try_from(envelope) {
                Ok(event) => events.push(event),
                Err(err) => {
                    report.malformed += 1;
                    self.notifications_skipped += 1;
                    warn!(
                        operation = %operation,
                        error = %err,
                        "Dropping notification without its payload"
                    );
                }
            }
        }
        events
    }

    /// Load, apply, and conditionally write the registry, retrying on
    /// version conflicts.
    fn apply_and_store(
        &mut self,
        events: &[ChangeEvent<DeviceProfile>],
        report: &mut ReferenceReport,
    ) -> Result<(), ReferenceError> {
        let key = self.config.registry_key.clone();

        for attempt in 1..=self.config.max_put_attempts {
            let (mut registry, condition) =
                match load_json::<ReferenceRegistry>(self.store.as_ref(), &key)? {
                    Some((registry, version)) => (registry, PutCondition::IfVersion(version)),
                    None => (ReferenceRegistry::new(), PutCondition::IfAbsent),
                };

            let mut applied = 0usize;
            let mut duplicates = 0usize;
            let mut missing = 0usize;
            for event in events {
                let operation = event.operation();
                match registry.apply(event.clone()) {
                    ApplyOutcome::Applied => applied += 1,
                    ApplyOutcome::DuplicateInsert => {
                        duplicates += 1;
                        warn!(operation = %operation, "Device already registered, keeping stored profile");
                    }
                    ApplyOutcome::MissingTarget => {
                        missing += 1;
                        debug!(operation = %operation, "No stored profile for event target");
                    }
                }
            }

            match store_json(self.store.as_ref(), &key, &registry, condition) {
                Ok(version) => {
                    report.applied = applied;
                    report.duplicate_inserts = duplicates;
                    report.missing_targets = missing;
                    report.registry_len = registry.len();
                    report.version = version;
                    self.events_applied += applied as u64;
                    return Ok(());
                }
                Err(err) if err.is_conflict() => {
                    report.write_conflicts += 1;
                    self.write_conflicts += 1;
                    warn!(
                        key = %key,
                        attempt,
                        error = %err,
                        "Registry moved under us, re-reading"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ReferenceError::WriteContention {
            key,
            attempts: self.config.max_put_attempts,
        })
    }

    /// Run the measurement-store cascade for each event, in order.
    ///
    /// Cascades are keyed operations that touch zero rows when the
    /// device owns nothing, so rerunning one is harmless. Failures are
    /// isolated per event; a later notification for the same device
    /// converges the stragglers.
    fn cascade(&mut self, events: &[ChangeEvent<DeviceProfile>], report: &mut ReferenceReport) {
        for event in events {
            match event {
                ChangeEvent::Insert { .. } => {}
                ChangeEvent::Modify { new } => {
                    match self.meters.relocate_readings_for_device(
                        &new.device_id,
                        &new.zipcode,
                        &new.coordinate,
                    ) {
                        Ok(count) => {
                            report.readings_relocated += count;
                            debug!(
                                device = new.device_id.as_str(),
                                rewritten = count,
                                "Cascaded profile relocation"
                            );
                        }
                        Err(err) => {
                            report.cascade_failures += 1;
                            self.cascade_failures += 1;
                            error!(
                                device = new.device_id.as_str(),
                                error = %err,
                                "Relocation cascade failed"
                            );
                        }
                    }
                }
                ChangeEvent::Remove { old } => {
                    match self.meters.delete_readings_for_device(&old.device_id) {
                        Ok(count) => {
                            report.readings_deleted += count;
                            debug!(
                                device = old.device_id.as_str(),
                                removed = count,
                                "Cascaded profile removal"
                            );
                        }
                        Err(err) => {
                            report.cascade_failures += 1;
                            self.cascade_failures += 1;
                            error!(
                                device = old.device_id.as_str(),
                                error = %err,
                                "Delete cascade failed"
                            );
                        }
                    }
                }
            }
        }
    }
}
