//! Relay message and ordering-key types

use std::fmt;

/// FIFO partition name
///
/// Messages published to one key are delivered in publish order and
/// consumed by at most one handler at a time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderingKey(String);

impl OrderingKey {
    /// Create a new OrderingKey
    ///
    /// # Panics
    /// Panics if the name is empty
    pub fn new(name: impl Into<String>) -> Self {
        let s = name.into();
        assert!(!s.is_empty(), "OrderingKey must not be empty");
        Self(s)
    }

    /// Get the key name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrderingKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A message as delivered to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    /// Per-key sequence assigned at publish time
    pub sequence: u64,
    /// Serialized payload
    pub body: String,
    /// Delivery attempts so far, including the current one
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_key_creation() {
        let key = OrderingKey::new("reading-sync");
        assert_eq!(key.as_str(), "reading-sync");
        assert_eq!(key.to_string(), "reading-sync");
    }

    #[test]
    #[should_panic(expected = "OrderingKey must not be empty")]
    fn test_ordering_key_empty() {
        OrderingKey::new("");
    }
}
