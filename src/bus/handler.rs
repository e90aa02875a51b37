//! Handler records, identifiers, and action filters.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StateNetError, ValidationError};

use super::event::EventPayload;

/// Unique identifier for a registered handler; the only token usable for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(Uuid);

impl HandlerId {
    /// Create a new random handler id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HandlerId {
    type Err = StateNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self).map_err(|_| {
            StateNetError::Validation(ValidationError::InvalidListenerId { id: s.to_string() })
        })
    }
}

/// The kind of intercepted operation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Get,
    Set,
    Delete,
    Apply,
}

impl Action {
    /// Returns the action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Apply => "apply",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = StateNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get" => Ok(Self::Get),
            "set" => Ok(Self::Set),
            "delete" => Ok(Self::Delete),
            "apply" => Ok(Self::Apply),
            other => Err(StateNetError::Validation(ValidationError::InvalidHandler {
                reason: format!("unknown action '{other}'"),
            })),
        }
    }
}

/// The set of actions a handler accepts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionFilter {
    /// Accept every action.
    #[default]
    All,
    /// Accept only the listed actions.
    Only(BTreeSet<Action>),
}

impl ActionFilter {
    /// Builds a filter from a list of actions.
    pub fn only(actions: impl IntoIterator<Item = Action>) -> Self {
        Self::Only(actions.into_iter().collect())
    }

    /// Returns true when `action` passes the filter.
    #[must_use]
    pub fn accepts(&self, action: Action) -> bool {
        match self {
            Self::All => true,
            Self::Only(actions) => actions.contains(&action),
        }
    }
}

impl From<Action> for ActionFilter {
    fn from(action: Action) -> Self {
        Self::only([action])
    }
}

impl<const N: usize> From<[Action; N]> for ActionFilter {
    fn from(actions: [Action; N]) -> Self {
        Self::only(actions)
    }
}

impl From<Option<Action>> for ActionFilter {
    fn from(action: Option<Action>) -> Self {
        action.map_or(Self::All, Self::from)
    }
}

/// Signature of a handler callback: `(payload, namespace, action)`.
pub type HandlerFn = dyn Fn(&EventPayload, &str, Action) + Send + Sync;

/// A shareable handler callback.
#[derive(Clone)]
pub struct Handler {
    func: Arc<HandlerFn>,
}

impl Handler {
    /// Wraps a closure.
    pub fn new(func: impl Fn(&EventPayload, &str, Action) + Send + Sync + 'static) -> Self {
        Self {
            func: Arc::new(func),
        }
    }

    pub(crate) fn call(&self, payload: &EventPayload, namespace: &str, action: Action) {
        (self.func)(payload, namespace, action);
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

/// A registered handler: callback plus accepted actions.
#[derive(Debug, Clone)]
pub struct HandlerRecord {
    pub handler: Handler,
    pub actions: ActionFilter,
}

impl HandlerRecord {
    /// Returns true when the record should run for `action`.
    #[must_use]
    pub fn accepts(&self, action: Action) -> bool {
        self.actions.accepts(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_id_round_trips_through_text() {
        let id = HandlerId::new();
        let parsed: HandlerId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn handler_id_rejects_malformed_text() {
        let err = "uuid".parse::<HandlerId>().unwrap_err();
        assert!(matches!(
            err,
            StateNetError::Validation(ValidationError::InvalidListenerId { .. })
        ));
    }

    #[test]
    fn action_filter_defaults_to_all() {
        let filter = ActionFilter::default();
        assert!(filter.accepts(Action::Get));
        assert!(filter.accepts(Action::Apply));
    }

    #[test]
    fn action_filter_only() {
        let filter = ActionFilter::from([Action::Set, Action::Delete]);
        assert!(filter.accepts(Action::Set));
        assert!(filter.accepts(Action::Delete));
        assert!(!filter.accepts(Action::Get));
    }

    #[test]
    fn action_parse() {
        assert_eq!("apply".parse::<Action>().unwrap(), Action::Apply);
        assert!("fire".parse::<Action>().is_err());
    }
}
