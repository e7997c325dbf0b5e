//! End-to-end wiring for the meter telemetry sync pipeline
//!
//! Assembles the live tables, relay, and every pipeline stage into one
//! process, then pumps change notifications through until nothing is
//! left in flight. Consumers commit only after their handler succeeds,
//! so a failing stage sees its batch again on the next run.
//!
//! # Architecture
//!
//! ```text
//!                 ┌────────┐
//!                 │ ingest │
//!                 └───┬────┘
//!        ┌───────────┴────────────┐
//!   ┌────▼─────┐            ┌─────▼─────┐
//!   │  device  │            │   meter   │◄───────────┐
//!   │  table   │            │   table   │            │
//!   └────┬─────┘            └─────┬─────┘            │ cascades
//!        │ reference outbox       │ measurement      │
//!   ┌────▼──────────┐             │ outbox           │
//!   │ reference-sync├─────────────┼──────────────────┘
//!   └────┬──────────┘       ┌─────▼──────────┐
//!        ▼                  │ change-capture │
//!   devices.json            └─────┬──────────┘
//!                                 │ relay "reading-sync"
//!                           ┌─────▼─────────┐
//!                           │ document-sync │──► readings.json
//!                           └─────┬─────────┘
//!                 fan-out {"data":[...]}
//!                    ┌────────────┴────────────┐
//!              "map-view"                "report-view"
//!              ┌─────▼──────┐           ┌──────▼──────┐
//!              │ geo builder│           │ age builder │
//!              └─────┬──────┘           └──────┬──────┘
//!                    ▼                         ▼
//!              meter-map.html      service-age-report.html
//! ```

use std::sync::Arc;

use change_capture::{ChangeCaptureEmitter, EmitterConfig};
use document_sync::{DocumentSynchronizer, SyncConfig, SyncError};
use ingest::IngestService;
use reference_sync::{ReferenceError, ReferenceSynchronizer};
use relay::memory::InMemoryRelay;
use relay::message::OrderingKey;
use relay::publisher::RelayError;
use storage::blob::{BlobStore, StorageError};
use storage::tables::{DeviceStore, InMemoryDeviceStore, InMemoryMeterStore, MeterStore};
use thiserror::Error;
use tracing::{debug, info, warn};
use types::change::ChangeNotification;
use types::clock::{Clock, SystemClock};
use view_builder::{AgeReportBuilder, GeoViewBuilder};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Document(#[from] SyncError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("pipeline still busy after {rounds} pump rounds")]
    Unsettled { rounds: usize },
}

/// Configuration for the pump
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Messages delivered per relay poll
    pub batch_size: usize,
    /// Pump rounds before [`Pipeline::run_until_idle`] gives up
    pub max_rounds: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            max_rounds: 64,
        }
    }
}

/// Work performed by one run of the pump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpSummary {
    /// Pump rounds that performed work
    pub rounds: usize,
    /// Reference notifications handed to the registry synchronizer
    pub reference_notifications: usize,
    /// Measurement notifications handed to the emitter
    pub measurement_notifications: usize,
    /// Relay batches applied to the canonical document
    pub document_batches: usize,
    /// Map artifact rebuilds
    pub map_builds: usize,
    /// Service-age report rebuilds
    pub report_builds: usize,
}

/// Every pipeline stage wired over shared in-process infrastructure
pub struct Pipeline {
    devices: Arc<InMemoryDeviceStore>,
    meters: Arc<InMemoryMeterStore>,
    relay: Arc<InMemoryRelay>,
    blobs: Arc<dyn BlobStore>,
    ingest: IngestService,
    emitter: ChangeCaptureEmitter,
    documents: DocumentSynchronizer,
    references: ReferenceSynchronizer,
    map_builder: GeoViewBuilder,
    report_builder: AgeReportBuilder,
    measurement_key: OrderingKey,
    map_key: OrderingKey,
    report_key: OrderingKey,
    config: PipelineConfig,
    // Reference batch held back after a failed synchronize, the
    // redelivery analog for notifications that bypass the relay
    pending_reference: Vec<ChangeNotification>,
}

impl Pipeline {
    pub fn new(blobs: Arc<dyn BlobStore>, clock: Arc<dyn Clock>, config: PipelineConfig) -> Self {
        let devices = Arc::new(InMemoryDeviceStore::new());
        let meters = Arc::new(InMemoryMeterStore::new());
        let relay = Arc::new(InMemoryRelay::with_defaults());

        let emitter_config = EmitterConfig::default();
        let measurement_key = emitter_config.relay_key.clone();
        let map_key = OrderingKey::new("map-view");
        let report_key = OrderingKey::new("report-view");
        let sync_config = SyncConfig {
            fanout_keys: vec![map_key.clone(), report_key.clone()],
            ..SyncConfig::default()
        };

        let ingest = IngestService::new(devices.clone(), meters.clone(), clock.clone());
        let emitter = ChangeCaptureEmitter::new(relay.clone(), emitter_config);
        let documents = DocumentSynchronizer::new(blobs.clone(), relay.clone(), sync_config);
        let references = ReferenceSynchronizer::with_defaults(blobs.clone(), meters.clone());
        let map_builder = GeoViewBuilder::with_defaults(blobs.clone());
        let report_builder = AgeReportBuilder::with_defaults(blobs.clone(), clock);

        info!("Pipeline assembled");
        Self {
            devices,
            meters,
            relay,
            blobs,
            ingest,
            emitter,
            documents,
            references,
            map_builder,
            report_builder,
            measurement_key,
            map_key,
            report_key,
            config,
            pending_reference: Vec::new(),
        }
    }

    /// Pipeline on the given blob store with wall-clock time
    pub fn with_defaults(blobs: Arc<dyn BlobStore>) -> Self {
        Self::new(blobs, Arc::new(SystemClock), PipelineConfig::default())
    }

    /// The ingestion front door
    pub fn ingest(&mut self) -> &mut IngestService {
        &mut self.ingest
    }

    /// The shared blob store
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// The shared relay
    pub fn relay(&self) -> &InMemoryRelay {
        &self.relay
    }

    /// Pump every stage until no outbox or relay key holds work.
    ///
    /// A batch that fails stays queued (relay) or buffered (reference
    /// notifications) and the error surfaces to the caller; calling
    /// again retries it.
    pub fn run_until_idle(&mut self) -> Result<PumpSummary, PipelineError> {
        let mut summary = PumpSummary::default();
        loop {
            if summary.rounds >= self.config.max_rounds {
                return Err(PipelineError::Unsettled {
                    rounds: summary.rounds,
                });
            }
            if !self.pump_once(&mut summary)? {
                debug!(rounds = summary.rounds, "Pipeline idle");
                return Ok(summary);
            }
            summary.rounds += 1;
        }
    }

    /// One pass over every stage, front to back. Returns whether any
    /// stage had work.
    fn pump_once(&mut self, summary: &mut PumpSummary) -> Result<bool, PipelineError> {
        let mut did_work = false;

        // Reference notifications go straight to the registry
        // synchronizer. Cascades it triggers land in the meter outbox,
        // which the measurement leg below picks up.
        self.pending_reference.extend(self.devices.drain_changes()?);
        if !self.pending_reference.is_empty() {
            did_work = true;
            let report = self.references.synchronize(self.pending_reference.clone())?;
            summary.reference_notifications += self.pending_reference.len();
            self.pending_reference.clear();
            debug!(
                applied = report.applied,
                deleted = report.readings_deleted,
                relocated = report.readings_relocated,
                "Reference batch applied"
            );
        }

        // Measurement outbox feeds the emitter
        let measurement_batch = self.meters.drain_changes()?;
        if !measurement_batch.is_empty() {
            did_work = true;
            summary.measurement_notifications += measurement_batch.len();
            let report = self.emitter.emit_batch(measurement_batch);
            if !report.is_clean() {
                warn!(
                    skipped = report.skipped,
                    failed = report.failed,
                    "Emitter dropped notifications"
                );
            }
        }

        // Measurement key feeds the document synchronizer
        let batch = self
            .relay
            .peek_batch(&self.measurement_key, self.config.batch_size)?;
        if let Some(last) = batch.last().map(|m| m.sequence) {
            did_work = true;
            let report = self.documents.synchronize(&batch)?;
            self.relay.commit(&self.measurement_key, last)?;
            summary.document_batches += 1;
            debug!(
                applied = report.applied,
                version = report.version,
                "Document batch committed"
            );
        }

        // Fan-out keys feed the builders
        let batch = self.relay.peek_batch(&self.map_key, self.config.batch_size)?;
        if let Some(last) = batch.last().map(|m| m.sequence) {
            did_work = true;
            for message in &batch {
                self.map_builder.handle_message(&message.body)?;
                summary.map_builds += 1;
            }
            self.relay.commit(&self.map_key, last)?;
        }

        let batch = self
            .relay
            .peek_batch(&self.report_key, self.config.batch_size)?;
        if let Some(last) = batch.last().map(|m| m.sequence) {
            did_work = true;
            for message in &batch {
                self.report_builder.handle_message(&message.body)?;
                summary.report_builds += 1;
            }
            self.relay.commit(&self.report_key, last)?;
        }

        Ok(did_work)
    }
}
