//! Node instructions.
//!
//! Instructions are reserved keys carried in the seed data (`__mutability`,
//! `__async`, ...) or supplied through configuration (`mutability`, `async`, ...).
//! The recognized set is closed; any other `__`-prefixed key is rejected.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bus::DispatchMode;
use crate::error::{ExecutionError, StateNetError, StateNetResult, ValidationError};
use crate::value::{ObjectMap, Value};

/// Prefix marking an instruction key inside seed data.
pub const INSTRUCTION_PREFIX: &str = "__";

/// The closed set of recognized instructions.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstructionName {
    NoListen,
    Mutability,
    Async,
    Concurrent,
    NoExternalRef,
    Descriptors,
    Identity,
    Access,
}

impl InstructionName {
    /// Every recognized instruction.
    pub const ALL: [Self; 8] = [
        Self::NoListen,
        Self::Mutability,
        Self::Async,
        Self::Concurrent,
        Self::NoExternalRef,
        Self::Descriptors,
        Self::Identity,
        Self::Access,
    ];

    /// Configuration key (`noListen`, `mutability`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoListen => "noListen",
            Self::Mutability => "mutability",
            Self::Async => "async",
            Self::Concurrent => "concurrent",
            Self::NoExternalRef => "noExternalRef",
            Self::Descriptors => "descriptors",
            Self::Identity => "identity",
            Self::Access => "access",
        }
    }

    /// Whether children copy this instruction from their parent.
    #[must_use]
    pub const fn is_inherited(self) -> bool {
        !matches!(self, Self::Identity | Self::Descriptors)
    }

    /// Classifies a seed data key.
    ///
    /// Returns `Ok(None)` for ordinary keys and `UnknownInstruction` for a
    /// prefixed key outside the recognized set.
    pub fn from_data_key(key: &str) -> StateNetResult<Option<Self>> {
        let Some(rest) = key.strip_prefix(INSTRUCTION_PREFIX) else {
            return Ok(None);
        };
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == rest)
            .map(Some)
            .ok_or_else(|| {
                StateNetError::Validation(ValidationError::UnknownInstruction {
                    name: key.to_string(),
                })
            })
    }
}

impl fmt::Display for InstructionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstructionName {
    type Err = StateNetError;

    /// Accepts both `mutability` and `__mutability`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s.strip_prefix(INSTRUCTION_PREFIX).unwrap_or(s);
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == bare)
            .ok_or_else(|| {
                StateNetError::Validation(ValidationError::UnknownInstruction { name: s.to_string() })
            })
    }
}

/// Immutability level of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mutability {
    /// No writes or deletes.
    Frozen,
    /// Existing keys may be written; no keys added or removed.
    Sealed,
    /// No keys added.
    NoExtend,
    #[default]
    Open,
}

impl Mutability {
    /// Returns the level name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Frozen => "frozen",
            Self::Sealed => "sealed",
            Self::NoExtend => "noExtend",
            Self::Open => "open",
        }
    }

    #[must_use]
    pub const fn allows_write(self) -> bool {
        !matches!(self, Self::Frozen)
    }

    #[must_use]
    pub const fn allows_add(self) -> bool {
        matches!(self, Self::Open)
    }

    #[must_use]
    pub const fn allows_delete(self) -> bool {
        matches!(self, Self::Open | Self::NoExtend)
    }
}

const fn yes() -> bool {
    true
}

/// Per-key property attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PropertyDescriptor {
    #[serde(default = "yes")]
    pub writable: bool,
    #[serde(default = "yes")]
    pub enumerable: bool,
    #[serde(default = "yes")]
    pub configurable: bool,
    /// Initial value written when the node is built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Default for PropertyDescriptor {
    fn default() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
            value: None,
        }
    }
}

/// A sparse set of instructions; `None` means unset (inheritable).
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct InstructionSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_listen: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutability: Option<Mutability>,
    #[serde(rename = "async", skip_serializing_if = "Option::is_none")]
    pub async_dispatch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_external_ref: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptors: Option<BTreeMap<String, PropertyDescriptor>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
}

impl InstructionSet {
    /// Whether dispatch is suppressed for this node.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.no_listen.unwrap_or(false)
    }

    /// Effective mutability (default `open`).
    #[must_use]
    pub fn mutability_level(&self) -> Mutability {
        self.mutability.unwrap_or_default()
    }

    /// Effective dispatch mode; `concurrent` implies deferred.
    #[must_use]
    pub fn dispatch_mode(&self) -> DispatchMode {
        if self.concurrent.unwrap_or(false) {
            DispatchMode::Concurrent
        } else if self.async_dispatch.unwrap_or(false) {
            DispatchMode::Async
        } else {
            DispatchMode::Sync
        }
    }

    /// Whether foreign handles are copied rather than rejected (default true).
    #[must_use]
    pub fn severs_external_refs(&self) -> bool {
        self.no_external_ref.unwrap_or(true)
    }

    /// Descriptor for a key, if one was declared.
    #[must_use]
    pub fn descriptor(&self, key: &str) -> Option<&PropertyDescriptor> {
        self.descriptors.as_ref()?.get(key)
    }

    /// True when no instruction is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Reads one instruction as a plain value; `Null` when unset.
    #[must_use]
    pub fn get(&self, name: InstructionName) -> Value {
        let json = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => map.remove(name.as_str()),
            _ => None,
        };
        json.map(Value::from).unwrap_or_default()
    }

    /// Writes one instruction. `identity` is read-only.
    pub fn set(&mut self, name: InstructionName, value: &Value) -> StateNetResult<()> {
        if name == InstructionName::Identity {
            return Err(StateNetError::Execution(ExecutionError::ReadOnlyInstructionViolation {
                name: name.as_str().to_string(),
            }));
        }
        self.apply(name, value)
    }

    /// Writes one instruction without the read-only check; used while building.
    pub(crate) fn apply(&mut self, name: InstructionName, value: &Value) -> StateNetResult<()> {
        let invalid = |reason: String| {
            StateNetError::Validation(ValidationError::InvalidInstructionValue {
                name: name.as_str().to_string(),
                reason,
            })
        };
        let json = value.to_json();
        match name {
            InstructionName::NoListen => self.no_listen = Some(parse_flag(&json).map_err(invalid)?),
            InstructionName::Async => self.async_dispatch = Some(parse_flag(&json).map_err(invalid)?),
            InstructionName::Concurrent => self.concurrent = Some(parse_flag(&json).map_err(invalid)?),
            InstructionName::NoExternalRef => {
                self.no_external_ref = Some(parse_flag(&json).map_err(invalid)?);
            }
            InstructionName::Mutability => {
                self.mutability = Some(serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?);
            }
            InstructionName::Descriptors => {
                self.descriptors = Some(serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?);
            }
            InstructionName::Identity => {
                self.identity = Some(parse_text(&json).map_err(invalid)?);
            }
            InstructionName::Access => {
                self.access = Some(parse_text(&json).map_err(invalid)?);
            }
        }
        Ok(())
    }

    /// Overwrites every field that `other` sets.
    pub fn overlay(&mut self, other: &Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field.clone_from(&other.$field);
                })*
            };
        }
        take!(
            no_listen,
            mutability,
            async_dispatch,
            concurrent,
            no_external_ref,
            descriptors,
            identity,
            access
        );
    }

    /// Fills unset inheritable fields from `parent`.
    #[must_use]
    pub fn inherit(mut self, parent: &Self) -> Self {
        macro_rules! fill {
            ($($field:ident),*) => {
                $(if self.$field.is_none() {
                    self.$field.clone_from(&parent.$field);
                })*
            };
        }
        fill!(no_listen, mutability, async_dispatch, concurrent, no_external_ref, access);
        self
    }

    /// Removes and parses every instruction key from an object.
    pub(crate) fn extract_from_object(map: &mut ObjectMap) -> StateNetResult<Self> {
        let mut found = Vec::new();
        for key in map.keys() {
            if let Some(name) = InstructionName::from_data_key(key)? {
                found.push((key.clone(), name));
            }
        }

        let mut set = Self::default();
        for (key, name) in found {
            if let Some(value) = map.remove(&key) {
                set.apply(name, &value)?;
            }
        }
        Ok(set)
    }

    /// Consumes a leading instruction bag from a sequence.
    ///
    /// The first element is a bag only when it is a non-empty object whose keys
    /// all carry the instruction prefix.
    pub(crate) fn extract_from_array(items: &mut Vec<Value>) -> StateNetResult<Self> {
        let is_bag = items.first().and_then(Value::as_object).is_some_and(|map| {
            !map.is_empty() && map.keys().all(|k| k.starts_with(INSTRUCTION_PREFIX))
        });
        if !is_bag {
            return Ok(Self::default());
        }

        match items.remove(0) {
            Value::Object(mut map) => Self::extract_from_object(&mut map),
            _ => Ok(Self::default()),
        }
    }
}

fn parse_flag(json: &serde_json::Value) -> Result<bool, String> {
    json.as_bool()
        .ok_or_else(|| format!("expected a boolean, got {json}"))
}

fn parse_text(json: &serde_json::Value) -> Result<String, String> {
    match json {
        serde_json::Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        other => Err(format!("expected a non-empty string, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(pairs: &[(&str, Value)]) -> ObjectMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn extracts_known_instructions_and_keeps_data() {
        let mut map = object(&[
            ("__mutability", Value::from("frozen")),
            ("__async", Value::Bool(true)),
            ("title", Value::from("nav")),
        ]);
        let set = InstructionSet::extract_from_object(&mut map).unwrap();
        assert_eq!(set.mutability, Some(Mutability::Frozen));
        assert_eq!(set.dispatch_mode(), DispatchMode::Async);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("title"));
    }

    #[test]
    fn unknown_prefixed_key_is_rejected() {
        let mut map = object(&[("__paging", Value::Bool(true))]);
        let err = InstructionSet::extract_from_object(&mut map).unwrap_err();
        assert!(matches!(
            err,
            StateNetError::Validation(ValidationError::UnknownInstruction { .. })
        ));
    }

    #[test]
    fn malformed_value_is_rejected() {
        let mut map = object(&[("__mutability", Value::from("melted"))]);
        let err = InstructionSet::extract_from_object(&mut map).unwrap_err();
        assert!(matches!(
            err,
            StateNetError::Validation(ValidationError::InvalidInstructionValue { .. })
        ));
    }

    #[test]
    fn array_bag_is_consumed_only_when_pure() {
        let mut items = vec![
            Value::Object(object(&[("__noListen", Value::Bool(true))])),
            Value::Int(1),
        ];
        let set = InstructionSet::extract_from_array(&mut items).unwrap();
        assert!(set.is_silent());
        assert_eq!(items, vec![Value::Int(1)]);

        let mut mixed = vec![Value::Object(object(&[
            ("__noListen", Value::Bool(true)),
            ("name", Value::from("a")),
        ]))];
        let set = InstructionSet::extract_from_array(&mut mixed).unwrap();
        assert!(set.is_empty());
        assert_eq!(mixed.len(), 1);
    }

    #[test]
    fn inheritance_skips_identity_and_descriptors() {
        let parent = InstructionSet {
            mutability: Some(Mutability::Sealed),
            identity: Some("root".to_string()),
            descriptors: Some(BTreeMap::from([("k".to_string(), PropertyDescriptor::default())])),
            ..InstructionSet::default()
        };
        let child = InstructionSet {
            async_dispatch: Some(true),
            ..InstructionSet::default()
        }
        .inherit(&parent);

        assert_eq!(child.mutability, Some(Mutability::Sealed));
        assert_eq!(child.async_dispatch, Some(true));
        assert!(child.identity.is_none());
        assert!(child.descriptors.is_none());

        let filled = InstructionSet::default().inherit(&parent);
        for name in InstructionName::ALL {
            let copied = !filled.get(name).is_null();
            assert_eq!(copied, name.is_inherited() && !parent.get(name).is_null(), "{name:?}");
        }
    }

    #[test]
    fn identity_is_read_only() {
        let mut set = InstructionSet::default();
        let err = set
            .set(InstructionName::Identity, &Value::from("x"))
            .unwrap_err();
        assert!(matches!(
            err,
            StateNetError::Execution(ExecutionError::ReadOnlyInstructionViolation { .. })
        ));
    }

    #[test]
    fn get_reads_back_config_names() {
        let mut set = InstructionSet::default();
        set.set(InstructionName::Mutability, &Value::from("noExtend"))
            .unwrap();
        assert_eq!(set.get(InstructionName::Mutability), Value::from("noExtend"));
        assert_eq!(set.get(InstructionName::Async), Value::Null);
    }

    #[test]
    fn names_parse_with_or_without_prefix() {
        assert_eq!(
            "__noExternalRef".parse::<InstructionName>().unwrap(),
            InstructionName::NoExternalRef
        );
        assert_eq!("async".parse::<InstructionName>().unwrap(), InstructionName::Async);
        assert!("paging".parse::<InstructionName>().is_err());
    }

    #[test]
    fn mutability_levels() {
        assert!(!Mutability::Frozen.allows_write());
        assert!(Mutability::Sealed.allows_write());
        assert!(!Mutability::Sealed.allows_add());
        assert!(!Mutability::Sealed.allows_delete());
        assert!(!Mutability::NoExtend.allows_add());
        assert!(Mutability::NoExtend.allows_delete());
        assert!(Mutability::Open.allows_add());
    }
}
