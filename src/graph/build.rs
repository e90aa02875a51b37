//! Value intake.
//!
//! Incoming containers are first turned into a `Draft` tree, validating keys and
//! instructions along the way. Only a fully valid draft is inserted into the
//! arena, so a failed intake never leaves orphan nodes behind.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::{StateNetError, StateNetResult, ValidationError};
use crate::namespace;
use crate::value::{Invocable, ObjectMap, Value};

use super::arena::{Arena, Body, Node, NodeId, Slot};
use super::instructions::InstructionSet;

#[derive(Debug)]
pub(crate) struct Draft {
    body: DraftBody,
    instructions: InstructionSet,
}

#[derive(Debug)]
enum DraftBody {
    Object(BTreeMap<String, DraftSlot>),
    Array(Vec<DraftSlot>),
    Function(Invocable),
}

#[derive(Debug)]
enum DraftSlot {
    Value(Value),
    Node(Draft),
}

/// Checks that a key can appear as a namespace segment.
pub(crate) fn validate_key(key: &str) -> StateNetResult<()> {
    let invalid = |reason: &str| {
        StateNetError::Validation(ValidationError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        })
    };
    if key.contains(namespace::SEPARATOR) {
        return Err(invalid("keys may not contain '.'"));
    }
    if namespace::is_selector(key) {
        return Err(invalid("selector segments are reserved"));
    }
    namespace::validate(key).map_err(|_| invalid("keys must match [A-Za-z0-9_$]+"))
}

/// Drafts a container or invocable. `overrides` replaces the node's own
/// instructions where set; children inherit from the result.
pub(crate) fn draft(
    value: Value,
    inherited: &InstructionSet,
    overrides: Option<&InstructionSet>,
) -> StateNetResult<Draft> {
    match value {
        Value::Object(map) => draft_object(map, inherited, overrides),
        Value::Array(items) => draft_array(items, inherited, overrides),
        Value::Function(func) => {
            let mut own = InstructionSet::default();
            if let Some(o) = overrides {
                own.overlay(o);
            }
            Ok(Draft {
                body: DraftBody::Function(func),
                instructions: own.inherit(inherited),
            })
        }
        other => Err(StateNetError::Validation(ValidationError::InvalidKey {
            key: String::new(),
            reason: format!("{} values are stored inline, not as nodes", other.kind()),
        })),
    }
}

fn draft_object(
    mut map: ObjectMap,
    inherited: &InstructionSet,
    overrides: Option<&InstructionSet>,
) -> StateNetResult<Draft> {
    let mut own = InstructionSet::extract_from_object(&mut map)?;
    if let Some(o) = overrides {
        own.overlay(o);
    }
    let resolved = own.inherit(inherited);

    if let Some(descriptors) = &resolved.descriptors {
        for (key, descriptor) in descriptors {
            if let Some(value) = &descriptor.value {
                map.insert(key.clone(), value.clone());
            }
        }
    }

    let mut slots = BTreeMap::new();
    for (key, value) in map {
        validate_key(&key)?;
        slots.insert(key, draft_slot(value, &resolved)?);
    }

    Ok(Draft {
        body: DraftBody::Object(slots),
        instructions: resolved,
    })
}

fn draft_array(
    mut items: Vec<Value>,
    inherited: &InstructionSet,
    overrides: Option<&InstructionSet>,
) -> StateNetResult<Draft> {
    let mut own = InstructionSet::extract_from_array(&mut items)?;
    if let Some(o) = overrides {
        own.overlay(o);
    }
    let resolved = own.inherit(inherited);

    let slots = items
        .into_iter()
        .map(|value| draft_slot(value, &resolved))
        .collect::<StateNetResult<Vec<_>>>()?;

    Ok(Draft {
        body: DraftBody::Array(slots),
        instructions: resolved,
    })
}

fn draft_slot(value: Value, inherited: &InstructionSet) -> StateNetResult<DraftSlot> {
    if value.is_node_kind() {
        Ok(DraftSlot::Node(draft(value, inherited, None)?))
    } else {
        Ok(DraftSlot::Value(value))
    }
}

/// Inserts a draft and its descendants. The new nodes carry no bindings yet.
pub(crate) fn insert(arena: &mut Arena, draft: Draft) -> NodeId {
    let Draft {
        body,
        mut instructions,
    } = draft;

    let body = match body {
        DraftBody::Object(slots) => Body::Object(
            slots
                .into_iter()
                .map(|(k, slot)| (k, insert_slot(arena, slot)))
                .collect(),
        ),
        DraftBody::Array(slots) => Body::Array(slots.into_iter().map(|slot| insert_slot(arena, slot)).collect()),
        DraftBody::Function(func) => Body::Function(func),
    };

    let identity = instructions
        .identity
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    instructions.identity = Some(identity.clone());

    arena.insert(Node::new(body, instructions, identity))
}

fn insert_slot(arena: &mut Arena, slot: DraftSlot) -> Slot {
    match slot {
        DraftSlot::Value(v) => Slot::Value(v),
        DraftSlot::Node(d) => Slot::Node(insert(arena, d)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::instructions::Mutability;
    use serde_json::json;

    fn seed(v: serde_json::Value) -> Value {
        Value::from(v)
    }

    #[test]
    fn children_inherit_resolved_instructions() {
        let d = draft(
            seed(json!({"__mutability": "sealed", "__identity": "root", "inner": {"x": 1}})),
            &InstructionSet::default(),
            None,
        )
        .unwrap();

        let DraftBody::Object(slots) = &d.body else {
            panic!("expected object");
        };
        let Some(DraftSlot::Node(inner)) = slots.get("inner") else {
            panic!("expected child node");
        };
        assert_eq!(inner.instructions.mutability, Some(Mutability::Sealed));
        assert!(inner.instructions.identity.is_none());
    }

    #[test]
    fn overrides_win_over_seed_instructions() {
        let overrides = InstructionSet {
            mutability: Some(Mutability::Frozen),
            ..InstructionSet::default()
        };
        let d = draft(
            seed(json!({"__mutability": "open"})),
            &InstructionSet::default(),
            Some(&overrides),
        )
        .unwrap();
        assert_eq!(d.instructions.mutability, Some(Mutability::Frozen));
    }

    #[test]
    fn invalid_keys_fail_the_whole_draft() {
        let err = draft(
            seed(json!({"ok": {"bad key": 1}})),
            &InstructionSet::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StateNetError::Validation(ValidationError::InvalidKey { .. })
        ));

        assert!(validate_key("$every").is_err());
        assert!(validate_key("a.b").is_err());
        assert!(validate_key("title_2").is_ok());
    }

    #[test]
    fn descriptor_values_are_written() {
        let d = draft(
            seed(json!({"__descriptors": {"version": {"writable": false, "value": 3}}})),
            &InstructionSet::default(),
            None,
        )
        .unwrap();
        let DraftBody::Object(slots) = &d.body else {
            panic!("expected object");
        };
        assert!(matches!(slots.get("version"), Some(DraftSlot::Value(Value::Int(3)))));
    }

    #[test]
    fn insert_assigns_identities() {
        let mut arena = Arena::default();
        let d = draft(
            seed(json!({"__identity": "fixed", "list": [1, {"a": 2}]})),
            &InstructionSet::default(),
            None,
        )
        .unwrap();
        let id = insert(&mut arena, d);

        assert_eq!(arena.len(), 3);
        let node = arena.get(id).unwrap();
        assert_eq!(node.identity, "fixed");
        assert_eq!(node.instructions.identity.as_deref(), Some("fixed"));
    }
}
