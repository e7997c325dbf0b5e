//! In-process ordered relay
//!
//! Messages stay queued until the consumer commits them, so an
//! invocation that fails part-way sees the same batch again on its next
//! delivery (at-least-once). Each ordering key is an independent FIFO.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::message::{OrderingKey, RelayMessage};
use crate::publisher::{RelayError, RelayPublisher};

/// Configuration for the in-memory relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum uncommitted messages per ordering key
    pub key_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            key_capacity: 10_000,
        }
    }
}

#[derive(Debug)]
struct QueuedMessage {
    sequence: u64,
    body: String,
    attempts: u32,
}

#[derive(Debug, Default)]
struct KeyQueue {
    messages: VecDeque<QueuedMessage>,
    next_sequence: u64,
    committed: u64,
}

/// Per-key delivery counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyStats {
    /// Uncommitted messages currently queued
    pub depth: usize,
    /// Messages published since creation
    pub published: u64,
    /// Messages committed since creation
    pub committed: u64,
}

/// In-memory multi-key FIFO relay
///
/// Uses BTreeMap so key iteration order is deterministic.
pub struct InMemoryRelay {
    queues: Mutex<BTreeMap<OrderingKey, KeyQueue>>,
    config: RelayConfig,
}

impl InMemoryRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            queues: Mutex::new(BTreeMap::new()),
            config,
        }
    }

    /// Create a relay with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<OrderingKey, KeyQueue>>, RelayError> {
        self.queues.lock().map_err(|_| RelayError::Unavailable {
            reason: "relay state mutex poisoned".to_string(),
        })
    }

    /// Append a message to the key's queue
    pub fn publish(&self, key: &OrderingKey, body: String) -> Result<u64, RelayError> {
        let mut queues = self.lock()?;
        let queue = queues.entry(key.clone()).or_default();

        if queue.messages.len() >= self.config.key_capacity {
            warn!(
                key = key.as_str(),
                capacity = self.config.key_capacity,
                "Relay key at capacity, rejecting publish"
            );
            return Err(RelayError::KeyAtCapacity {
                key: key.to_string(),
                capacity: self.config.key_capacity,
            });
        }

        queue.next_sequence += 1;
        let sequence = queue.next_sequence;
        queue.messages.push_back(QueuedMessage {
            sequence,
            body,
            attempts: 0,
        });
        debug!(key = key.as_str(), sequence, "Queued message");
        Ok(sequence)
    }

    /// Deliver up to `max` messages from the head of the key's queue
    /// without removing them
    ///
    /// Each call counts as one delivery attempt for the returned
    /// messages.
    pub fn peek_batch(&self, key: &OrderingKey, max: usize) -> Result<Vec<RelayMessage>, RelayError> {
        let mut queues = self.lock()?;
        let queue = match queues.get_mut(key) {
            Some(queue) => queue,
            None => return Ok(Vec::new()),
        };

        let batch = queue
            .messages
            .iter_mut()
            .take(max)
            .map(|queued| {
                queued.attempts += 1;
                RelayMessage {
                    sequence: queued.sequence,
                    body: queued.body.clone(),
                    attempts: queued.attempts,
                }
            })
            .collect();
        Ok(batch)
    }

    /// Remove every message with `sequence <= up_to`, returning how many
    /// were removed
    pub fn commit(&self, key: &OrderingKey, up_to: u64) -> Result<usize, RelayError> {
        let mut queues = self.lock()?;
        let queue = match queues.get_mut(key) {
            Some(queue) => queue,
            None => return Ok(0),
        };

        let before = queue.messages.len();
        queue.messages.retain(|queued| queued.sequence > up_to);
        let removed = before - queue.messages.len();
        queue.committed += removed as u64;
        debug!(key = key.as_str(), up_to, removed, "Committed batch");
        Ok(removed)
    }

    /// Uncommitted messages currently queued on a key
    pub fn depth(&self, key: &OrderingKey) -> Result<usize, RelayError> {
        let queues = self.lock()?;
        Ok(queues.get(key).map(|queue| queue.messages.len()).unwrap_or(0))
    }

    /// Keys that currently hold uncommitted messages, in name order
    pub fn active_keys(&self) -> Result<Vec<OrderingKey>, RelayError> {
        let queues = self.lock()?;
        Ok(queues
            .iter()
            .filter(|(_, queue)| !queue.messages.is_empty())
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Delivery counters for a key
    pub fn stats(&self, key: &OrderingKey) -> Result<KeyStats, RelayError> {
        let queues = self.lock()?;
        Ok(queues
            .get(key)
            .map(|queue| KeyStats {
                depth: queue.messages.len(),
                published: queue.next_sequence,
                committed: queue.committed,
            })
            .unwrap_or_default())
    }
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

impl RelayPublisher for InMemoryRelay {
    fn publish(&self, key: &OrderingKey, body: String) -> Result<u64, RelayError> {
        InMemoryRelay::publish(self, key, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(name: &str) -> OrderingKey {
        OrderingKey::new(name)
    }

    #[test]
    fn test_publish_assigns_increasing_sequences() {
        let relay = InMemoryRelay::default();
        let k = key("reading-sync");

        assert_eq!(relay.publish(&k, "a".into()).unwrap(), 1);
        assert_eq!(relay.publish(&k, "b".into()).unwrap(), 2);
        assert_eq!(relay.publish(&k, "c".into()).unwrap(), 3);
    }

    #[test]
    fn test_peek_preserves_order_and_leaves_queue_intact() {
        let relay = InMemoryRelay::default();
        let k = key("reading-sync");
        relay.publish(&k, "a".into()).unwrap();
        relay.publish(&k, "b".into()).unwrap();

        let batch = relay.peek_batch(&k, 10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].body, "a");
        assert_eq!(batch[1].body, "b");

        // Not committed, so the same batch is delivered again
        assert_eq!(relay.depth(&k).unwrap(), 2);
        let redelivered = relay.peek_batch(&k, 10).unwrap();
        assert_eq!(redelivered[0].body, "a");
        assert_eq!(redelivered[0].attempts, 2);
    }

    #[test]
    fn test_commit_removes_up_to_sequence() {
        let relay = InMemoryRelay::default();
        let k = key("reading-sync");
        relay.publish(&k, "a".into()).unwrap();
        let second = relay.publish(&k, "b".into()).unwrap();
        relay.publish(&k, "c".into()).unwrap();

        let removed = relay.commit(&k, second).unwrap();
        assert_eq!(removed, 2);

        let rest = relay.peek_batch(&k, 10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].body, "c");
    }

    #[test]
    fn test_commit_on_unknown_key_is_a_no_op() {
        let relay = InMemoryRelay::default();
        assert_eq!(relay.commit(&key("nothing"), 5).unwrap(), 0);
    }

    #[test]
    fn test_capacity_rejection() {
        let relay = InMemoryRelay::new(RelayConfig { key_capacity: 2 });
        let k = key("reading-sync");
        relay.publish(&k, "a".into()).unwrap();
        relay.publish(&k, "b".into()).unwrap();

        let err = relay.publish(&k, "c".into()).unwrap_err();
        assert_eq!(
            err,
            RelayError::KeyAtCapacity {
                key: "reading-sync".to_string(),
                capacity: 2,
            }
        );
    }

    #[test]
    fn test_keys_are_independent() {
        let relay = InMemoryRelay::default();
        relay.publish(&key("map-view"), "m".into()).unwrap();
        relay.publish(&key("report-view"), "r".into()).unwrap();

        relay.commit(&key("map-view"), 1).unwrap();
        assert_eq!(relay.depth(&key("map-view")).unwrap(), 0);
        assert_eq!(relay.depth(&key("report-view")).unwrap(), 1);

        let active = relay.active_keys().unwrap();
        assert_eq!(active, vec![key("report-view")]);
    }

    #[test]
    fn test_stats_track_published_and_committed() {
        let relay = InMemoryRelay::default();
        let k = key("reading-sync");
        relay.publish(&k, "a".into()).unwrap();
        relay.publish(&k, "b".into()).unwrap();
        relay.commit(&k, 1).unwrap();

        let stats = relay.stats(&k).unwrap();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.depth, 1);
    }

    proptest! {
        #[test]
        fn prop_drain_preserves_publish_order(bodies in proptest::collection::vec("[a-z]{1,8}", 1..50)) {
            let relay = InMemoryRelay::default();
            let k = key("reading-sync");
            for body in &bodies {
                relay.publish(&k, body.clone()).unwrap();
            }

            let mut drained = Vec::new();
            loop {
                let batch = relay.peek_batch(&k, 7).unwrap();
                if batch.is_empty() {
                    break;
                }
                let last = batch.last().map(|m| m.sequence).unwrap_or(0);
                drained.extend(batch.into_iter().map(|m| m.body));
                relay.commit(&k, last).unwrap();
            }

            prop_assert_eq!(drained, bodies);
        }
    }
}
