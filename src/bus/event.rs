//! Change descriptors dispatched through the bus.
//!
//! These types are serializable so a relay can forward them to a remote peer.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// How a write or delete affected a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayAction {
    /// Index equal to the current length.
    Append,
    /// Index within the current bounds.
    Replace,
    /// Index past the end; intermediate slots become holes.
    Set,
    /// Slot removed; the length is unchanged.
    Delete,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadEvent {
    pub namespace: String,
    pub name: String,
    pub parent_namespace: String,
    pub miss: bool,
    pub value: Value,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteEvent {
    pub namespace: String,
    pub name: String,
    pub parent_namespace: String,
    pub miss: bool,
    pub type_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_action: Option<ArrayAction>,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEvent {
    pub namespace: String,
    pub name: String,
    pub parent_namespace: String,
    pub miss: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_action: Option<ArrayAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    pub success: bool,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyEvent {
    pub namespace: String,
    pub scope: Value,
    pub arguments: Vec<Value>,
}

/// Payload handed to handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trap", rename_all = "snake_case")]
pub enum EventPayload {
    /// A key was read.
    Get(ReadEvent),
    /// A key was written.
    Set(WriteEvent),
    /// A key was deleted.
    Delete(DeleteEvent),
    /// An invocable node was called.
    Apply(ApplyEvent),
    /// An event injected from outside the graph, e.g. by a relay.
    Remote { data: Value },
}

impl EventPayload {
    /// The namespace the event was produced for, if it came from the graph.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Get(e) => Some(&e.namespace),
            Self::Set(e) => Some(&e.namespace),
            Self::Delete(e) => Some(&e.namespace),
            Self::Apply(e) => Some(&e.namespace),
            Self::Remote { .. } => None,
        }
    }

    /// The new (or read) value, for get and set events.
    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Get(e) => Some(&e.value),
            Self::Set(e) => Some(&e.value),
            Self::Remote { data } => Some(data),
            Self::Delete(_) | Self::Apply(_) => None,
        }
    }

    /// The replaced value, for set and delete events.
    #[must_use]
    pub const fn old_value(&self) -> Option<&Value> {
        match self {
            Self::Set(e) => e.old_value.as_ref(),
            Self::Delete(e) => e.old_value.as_ref(),
            _ => None,
        }
    }

    /// Whether the key was absent before the operation.
    #[must_use]
    pub const fn miss(&self) -> Option<bool> {
        match self {
            Self::Get(e) => Some(e.miss),
            Self::Set(e) => Some(e.miss),
            Self::Delete(e) => Some(e.miss),
            Self::Apply(_) | Self::Remote { .. } => None,
        }
    }

    /// The sequence classification, if the target was a sequence.
    #[must_use]
    pub const fn array_action(&self) -> Option<ArrayAction> {
        match self {
            Self::Set(e) => e.array_action,
            Self::Delete(e) => e.array_action,
            _ => None,
        }
    }

    /// Whether a write changed the storage kind.
    #[must_use]
    pub const fn type_change(&self) -> bool {
        matches!(self, Self::Set(e) if e.type_change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_event_serializes_in_camel_case() {
        let payload = EventPayload::Set(WriteEvent {
            namespace: "$.main.left.rows.2".to_string(),
            name: "2".to_string(),
            parent_namespace: "$.main.left.rows".to_string(),
            miss: true,
            type_change: false,
            array_action: Some(ArrayAction::Append),
            value: Value::from("row3"),
            old_value: None,
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            json!({
                "trap": "set",
                "namespace": "$.main.left.rows.2",
                "name": "2",
                "parentNamespace": "$.main.left.rows",
                "miss": true,
                "typeChange": false,
                "arrayAction": "append",
                "value": "row3"
            })
        );
    }

    #[test]
    fn accessors() {
        let payload = EventPayload::Delete(DeleteEvent {
            namespace: "$.a.b".to_string(),
            name: "b".to_string(),
            parent_namespace: "$.a".to_string(),
            miss: false,
            array_action: None,
            old_value: Some(Value::Int(1)),
            success: true,
        });
        assert_eq!(payload.namespace(), Some("$.a.b"));
        assert_eq!(payload.old_value(), Some(&Value::Int(1)));
        assert_eq!(payload.value(), None);
        assert_eq!(payload.miss(), Some(false));
        assert!(!payload.type_change());
    }
}
