//! Change-capture notification and envelope types
//!
//! A live-table mutation produces a [`ChangeNotification`] carrying the
//! raw row images. The capture emitter normalizes measurement
//! notifications into the relay [`Envelope`] wire shape, and consumers
//! convert envelopes into the typed [`ChangeEvent`] union before applying
//! them, so every apply path matches exhaustively on the operation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Which live table produced a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStream {
    Measurement,
    Reference,
}

impl fmt::Display for SourceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStream::Measurement => write!(f, "measurement"),
            SourceStream::Reference => write!(f, "reference"),
        }
    }
}

/// Mutation kind reported by change capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Modify,
    Remove,
}

impl Operation {
    /// Wire label, used in logs and error messages
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Modify => "MODIFY",
            Operation::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw change notification emitted by a live store
///
/// Row images are untyped JSON: change capture reports whatever the
/// table held, including rows that predate the current record schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub source: SourceStream,
    pub operation: Operation,
    #[serde(default)]
    pub new_image: Option<Value>,
    #[serde(default)]
    pub old_image: Option<Value>,
}

impl ChangeNotification {
    pub fn insert(source: SourceStream, new_image: Value) -> Self {
        Self {
            source,
            operation: Operation::Insert,
            new_image: Some(new_image),
            old_image: None,
        }
    }

    /// Parse the raw row images into typed items, keeping the operation.
    pub fn into_envelope<R: DeserializeOwned>(self) -> Result<Envelope<R>, serde_json::Error> {
        let new_item = self.new_image.map(serde_json::from_value).transpose()?;
        let old_item = self.old_image.map(serde_json::from_value).transpose()?;
        Ok(Envelope::new(self.operation, new_item, old_item))
    }

    pub fn modify(source: SourceStream, new_image: Value, old_image: Value) -> Self {
        Self {
            source,
            operation: Operation::Modify,
            new_image: Some(new_image),
            old_image: Some(old_image),
        }
    }

    pub fn remove(source: SourceStream, old_image: Value) -> Self {
        Self {
            source,
            operation: Operation::Remove,
            new_image: None,
            old_image: Some(old_image),
        }
    }
}

/// Relay wire envelope: `{"operation": ..., "newItem": ..., "oldItem": ...}`
///
/// Absent items serialize as `null`; consumers treat `null` and a missing
/// key the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<R> {
    pub operation: Operation,
    #[serde(default = "Option::default")]
    pub new_item: Option<R>,
    #[serde(default = "Option::default")]
    pub old_item: Option<R>,
}

impl<R> Envelope<R> {
    pub fn new(operation: Operation, new_item: Option<R>, old_item: Option<R>) -> Self {
        Self {
            operation,
            new_item,
            old_item,
        }
    }
}

/// Envelope that cannot back the operation it claims
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvelopeError {
    #[error("{operation} envelope is missing its {field} payload")]
    MissingItem {
        operation: Operation,
        field: &'static str,
    },
}

/// Typed change event, one variant per operation
///
/// The payload each operation acts on is mandatory here, unlike the
/// optional items on the wire envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<R> {
    Insert { new: R },
    Modify { new: R },
    Remove { old: R },
}

impl<R> ChangeEvent<R> {
    pub fn operation(&self) -> Operation {
        match self {
            ChangeEvent::Insert { .. } => Operation::Insert,
            ChangeEvent::Modify { .. } => Operation::Modify,
            ChangeEvent::Remove { .. } => Operation::Remove,
        }
    }
}

/// Outcome of applying one change event to a keyed collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Collection mutated.
    Applied,
    /// INSERT whose key is already stored; the stored entry wins.
    DuplicateInsert,
    /// MODIFY or REMOVE whose key is not stored.
    MissingTarget,
}

impl<R> TryFrom<Envelope<R>> for ChangeEvent<R> {
    type Error = EnvelopeError;

    fn try_from(envelope: Envelope<R>) -> Result<Self, Self::Error> {
        match envelope.operation {
            Operation::Insert => envelope
                .new_item
                .map(|new| ChangeEvent::Insert { new })
                .ok_or(EnvelopeError::MissingItem {
                    operation: Operation::Insert,
                    field: "newItem",
                }),
            Operation::Modify => envelope
                .new_item
                .map(|new| ChangeEvent::Modify { new })
                .ok_or(EnvelopeError::MissingItem {
                    operation: Operation::Modify,
                    field: "newItem",
                }),
            Operation::Remove => envelope
                .old_item
                .map(|old| ChangeEvent::Remove { old })
                .ok_or(EnvelopeError::MissingItem {
                    operation: Operation::Remove,
                    field: "oldItem",
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Operation::Insert).unwrap(), "\"INSERT\"");
        assert_eq!(serde_json::to_string(&Operation::Modify).unwrap(), "\"MODIFY\"");
        assert_eq!(serde_json::to_string(&Operation::Remove).unwrap(), "\"REMOVE\"");
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::new(Operation::Remove, None, Some(json!({"id": "x"})));
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(json, r#"{"operation":"REMOVE","newItem":null,"oldItem":{"id":"x"}}"#);
    }

    #[test]
    fn test_envelope_tolerates_missing_keys() {
        let envelope: Envelope<Value> =
            serde_json::from_str(r#"{"operation":"INSERT","newItem":{"id":"x"}}"#).unwrap();
        assert_eq!(envelope.operation, Operation::Insert);
        assert!(envelope.old_item.is_none());
    }

    #[test]
    fn test_envelope_rejects_unknown_operation() {
        let result = serde_json::from_str::<Envelope<Value>>(r#"{"operation":"UPSERT"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_event_from_envelope() {
        let insert: ChangeEvent<Value> =
            Envelope::new(Operation::Insert, Some(json!(1)), None).try_into().unwrap();
        assert_eq!(insert.operation(), Operation::Insert);

        let modify: ChangeEvent<Value> =
            Envelope::new(Operation::Modify, Some(json!(2)), Some(json!(1))).try_into().unwrap();
        assert_eq!(modify.operation(), Operation::Modify);

        let remove: ChangeEvent<Value> =
            Envelope::new(Operation::Remove, None, Some(json!(1))).try_into().unwrap();
        assert_eq!(remove.operation(), Operation::Remove);
    }

    #[test]
    fn test_event_requires_backing_item() {
        let missing = Envelope::<Value>::new(Operation::Insert, None, None);
        let err = ChangeEvent::try_from(missing).unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::MissingItem {
                operation: Operation::Insert,
                field: "newItem",
            }
        );
        assert_eq!(err.to_string(), "INSERT envelope is missing its newItem payload");
    }

    #[test]
    fn test_notification_round_trip() {
        let notification = ChangeNotification::modify(
            SourceStream::Reference,
            json!({"deviceId": "m-1", "zipcode": "91214"}),
            json!({"deviceId": "m-1", "zipcode": "91020"}),
        );
        let text = serde_json::to_string(&notification).unwrap();
        assert!(text.contains(r#""source":"reference""#));
        assert!(text.contains(r#""operation":"MODIFY""#));

        let back: ChangeNotification = serde_json::from_str(&text).unwrap();
        assert_eq!(back, notification);
    }

    #[test]
    fn test_notification_into_typed_envelope() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Row {
            id: String,
        }

        let notification = ChangeNotification::modify(
            SourceStream::Measurement,
            json!({"id": "b"}),
            json!({"id": "a"}),
        );
        let envelope: Envelope<Row> = notification.into_envelope().unwrap();
        assert_eq!(envelope.operation, Operation::Modify);
        assert_eq!(envelope.new_item, Some(Row { id: "b".into() }));
        assert_eq!(envelope.old_item, Some(Row { id: "a".into() }));

        let bad = ChangeNotification::insert(SourceStream::Measurement, json!({"id": 7}));
        assert!(bad.into_envelope::<Row>().is_err());
    }
}
