//! Emitter that turns captured table changes into relay traffic.
//!
//! Drained change notifications arrive with raw JSON row images. The
//! emitter parses the images, wraps them in the wire envelope, and
//! publishes the result onto the measurement ordering key so every
//! downstream consumer observes mutations in capture order.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use relay::message::OrderingKey;
use relay::publisher::RelayPublisher;
use types::change::{ChangeNotification, Envelope, SourceStream};
use types::record::MeterReading;

/// Configuration for the change capture emitter.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Ordering key that carries all measurement envelopes.
    pub relay_key: OrderingKey,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            relay_key: OrderingKey::new("reading-sync"),
        }
    }
}

/// Outcome of emitting a single change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Envelope published; carries the relay sequence number.
    Published(u64),
    /// Notification was malformed and dropped.
    Skipped,
    /// Envelope was well formed but the relay rejected it.
    Failed,
}

/// Per-batch summary of emitter work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterReport {
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl EmitterReport {
    /// Whether every notification in the batch made it onto the relay.
    pub fn is_clean(&self) -> bool {
        self.skipped == 0 && self.failed == 0
    }
}

/// Bridges measurement table outboxes onto the relay.
///
/// Malformed notifications are logged and dropped so one bad row never
/// stalls the stream. Publish failures are logged and counted but not
/// retried; the outbox drain that produced the batch is already spent.
pub struct ChangeCaptureEmitter {
    relay: Arc<dyn RelayPublisher>,
    config: EmitterConfig,
    /// Total envelopes published since creation.
    envelopes_published: u64,
    /// Total malformed notifications dropped since creation.
    notifications_skipped: u64,
    /// Total publish attempts rejected by the relay.
    publish_failures: u64,
}

impl ChangeCaptureEmitter {
    /// Create an emitter with the given configuration.
    pub fn new(relay: Arc<dyn RelayPublisher>, config: EmitterConfig) -> Self {
        info!(relay_key = %config.relay_key, "ChangeCaptureEmitter initialized");
        Self {
            relay,
            config,
            envelopes_published: 0,
            notifications_skipped: 0,
            publish_failures: 0,
        }
    }

    /// Create an emitter with default configuration.
    pub fn with_defaults(relay: Arc<dyn RelayPublisher>) -> Self {
        Self::new(relay, EmitterConfig::default())
    }

    /// Emit every notification in a drained batch, in order.
    pub fn emit_batch(&mut self, notifications: Vec<ChangeNotification>) -> EmitterReport {
        let mut report = EmitterReport::default();
        for notification in notifications {
            match self.emit(notification) {
                EmitOutcome::Published(_) => report.published += 1,
                EmitOutcome::Skipped => report.skipped += 1,
                EmitOutcome::Failed => report.failed += 1,
            }
        }
        debug!(
            published = report.published,
            skipped = report.skipped,
            failed = report.failed,
            "Emitted change batch"
        );
        report
    }

    /// Emit a single change notification.
    pub fn emit(&mut self, notification: ChangeNotification) -> EmitOutcome {
        if notification.source != SourceStream::Measurement {
            self.notifications_skipped += 1;
            warn!(
                source = %notification.source,
                operation = %notification.operation,
                "Dropping notification from unexpected source stream"
            );
            return EmitOutcome::Skipped;
        }

        let operation = notification.operation;

        let envelope: Envelope<MeterReading> = match notification.into_envelope() {
            Ok(envelope) => envelope,
            Err(err) => {
                self.notifications_skipped += 1;
                warn!(
                    operation = %operation,
                    error = %err,
                    "Dropping notification with unreadable row image"
                );
                return EmitOutcome::Skipped;
            }
        };

        let body = match serde_json::to_string(&envelope) {
            Ok(body) => body,
            Err(err) => {
                self.notifications_skipped += 1;
                warn!(
                    operation = %operation,
                    error = %err,
                    "Dropping envelope that failed to serialize"
                );
                return EmitOutcome::Skipped;
            }
        };

        match self.relay.publish(&self.config.relay_key, body) {
            Ok(sequence) => {
                self.envelopes_published += 1;
                debug!(
                    sequence,
                    operation = %operation,
                    "Published change envelope"
                );
                EmitOutcome::Published(sequence)
            }
            Err(err) => {
                self.publish_failures += 1;
                error!(
                    key = %self.config.relay_key,
                    operation = %operation,
                    error = %err,
                    "Relay rejected change envelope"
                );
                EmitOutcome::Failed
            }
        }
    }

    /// Total envelopes published since creation.
    pub fn envelopes_published(&self) -> u64 {
        self.envelopes_published
    }

    /// Total malformed notifications dropped since creation.
    pub fn notifications_skipped(&self) -> u64 {
        self.notifications_skipped
    }

    /// Total publish attempts rejected by the relay.
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use relay::memory::{InMemoryRelay, RelayConfig};
    use rust_decimal::Decimal;
    use serde_json::json;
    use types::change::Operation;
    use types::ids::{DeviceId, ReadingId, Zipcode};
    use types::numeric::Coordinate;

    fn make_reading(device: &str) -> MeterReading {
        MeterReading {
            id: ReadingId::new(),
            device_id: DeviceId::new(device),
            value: Decimal::new(642, 2),
            zipcode: Zipcode::new("91020"),
            date: NaiveDate::from_ymd_opt(2024, 7, 15).unwrap(),
            timestamp: 1_721_000_000,
            coordinate: Coordinate::pair(
                Decimal::new(342, 1),
                Decimal::new(-11823, 2),
            ),
        }
    }

    fn image(reading: &MeterReading) -> serde_json::Value {
        serde_json::to_value(reading).unwrap()
    }

    #[test]
    fn test_insert_notification_published() {
        let relay = Arc::new(InMemoryRelay::with_defaults());
        let mut emitter = ChangeCaptureEmitter::with_defaults(relay.clone());

        let reading = make_reading("m-1");
        let outcome = emitter.emit(ChangeNotification::insert(
            SourceStream::Measurement,
            image(&reading),
        ));
        assert_eq!(outcome, EmitOutcome::Published(1));

        let key = OrderingKey::new("reading-sync");
        let batch = relay.peek_batch(&key, 10).unwrap();
        assert_eq!(batch.len(), 1);

        let envelope: Envelope<MeterReading> =
            serde_json::from_str(&batch[0].body).unwrap();
        assert_eq!(envelope.operation, Operation::Insert);
        assert_eq!(envelope.new_item, Some(reading));
        assert_eq!(envelope.old_item, None);
    }

    #[test]
    fn test_modify_notification_carries_both_images() {
        let relay = Arc::new(InMemoryRelay::with_defaults());
        let mut emitter = ChangeCaptureEmitter::with_defaults(relay.clone());

        let mut new = make_reading("m-1");
        let old = new.clone();
        new.timestamp += 60;

        emitter.emit(ChangeNotification::modify(
            SourceStream::Measurement,
            image(&new),
            image(&old),
        ));

        let key = OrderingKey::new("reading-sync");
        let batch = relay.peek_batch(&key, 10).unwrap();
        let envelope: Envelope<MeterReading> =
            serde_json::from_str(&batch[0].body).unwrap();
        assert_eq!(envelope.operation, Operation::Modify);
        assert_eq!(envelope.new_item, Some(new));
        assert_eq!(envelope.old_item, Some(old));
    }

    #[test]
    fn test_wrong_source_stream_skipped() {
        let relay = Arc::new(InMemoryRelay::with_defaults());
        let mut emitter = ChangeCaptureEmitter::with_defaults(relay.clone());

        let reading = make_reading("m-1");
        let outcome = emitter.emit(ChangeNotification::insert(
            SourceStream::Reference,
            image(&reading),
        ));
        assert_eq!(outcome, EmitOutcome::Skipped);
        assert_eq!(emitter.notifications_skipped(), 1);
        assert_eq!(relay.depth(&OrderingKey::new("reading-sync")).unwrap(), 0);
    }

    #[test]
    fn test_unreadable_image_skipped_batch_continues() {
        let relay = Arc::new(InMemoryRelay::with_defaults());
        let mut emitter = ChangeCaptureEmitter::with_defaults(relay.clone());

        let good = make_reading("m-2");
        let report = emitter.emit_batch(vec![
            ChangeNotification::insert(
                SourceStream::Measurement,
                json!({"id": "not-a-uuid", "deviceId": 7}),
            ),
            ChangeNotification::insert(SourceStream::Measurement, image(&good)),
        ]);

        assert_eq!(report.published, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert!(!report.is_clean());
        assert_eq!(relay.depth(&OrderingKey::new("reading-sync")).unwrap(), 1);
    }

    #[test]
    fn test_publish_failure_counted_not_retried() {
        let relay = Arc::new(InMemoryRelay::new(RelayConfig { key_capacity: 1 }));
        let mut emitter = ChangeCaptureEmitter::with_defaults(relay.clone());

        let report = emitter.emit_batch(vec![
            ChangeNotification::insert(SourceStream::Measurement, image(&make_reading("m-1"))),
            ChangeNotification::insert(SourceStream::Measurement, image(&make_reading("m-2"))),
        ]);

        assert_eq!(report.published, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(emitter.publish_failures(), 1);
        assert_eq!(relay.depth(&OrderingKey::new("reading-sync")).unwrap(), 1);
    }

    #[test]
    fn test_batch_preserves_capture_order() {
        let relay = Arc::new(InMemoryRelay::with_defaults());
        let mut emitter = ChangeCaptureEmitter::with_defaults(relay.clone());

        let first = make_reading("m-1");
        let second = make_reading("m-1");
        emitter.emit_batch(vec![
            ChangeNotification::insert(SourceStream::Measurement, image(&first)),
            ChangeNotification::modify(
                SourceStream::Measurement,
                image(&second),
                image(&first),
            ),
        ]);

        let key = OrderingKey::new("reading-sync");
        let batch = relay.peek_batch(&key, 10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].sequence, 1);
        assert_eq!(batch[1].sequence, 2);

        let head: Envelope<MeterReading> = serde_json::from_str(&batch[0].body).unwrap();
        let tail: Envelope<MeterReading> = serde_json::from_str(&batch[1].body).unwrap();
        assert_eq!(head.operation, Operation::Insert);
        assert_eq!(tail.operation, Operation::Modify);
    }

    #[test]
    fn test_emitter_stats() {
        let relay = Arc::new(InMemoryRelay::with_defaults());
        let mut emitter = ChangeCaptureEmitter::with_defaults(relay);

        let reading = make_reading("m-1");
        emitter.emit(ChangeNotification::insert(
            SourceStream::Measurement,
            image(&reading),
        ));
        emitter.emit(ChangeNotification::insert(
            SourceStream::Reference,
            image(&reading),
        ));
        emitter.emit(ChangeNotification::remove(
            SourceStream::Measurement,
            image(&reading),
        ));

        assert_eq!(emitter.envelopes_published(), 2);
        assert_eq!(emitter.notifications_skipped(), 1);
        assert_eq!(emitter.publish_failures(), 0);
    }
}
