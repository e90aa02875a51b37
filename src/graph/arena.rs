//! Generational node storage.
//!
//! Containers hold child `NodeId`s rather than values, so one node can be bound
//! under several namespaces without copying. A freed slot bumps its generation;
//! ids minted before the free no longer resolve.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::value::{Invocable, Value, ValueKind};

use super::instructions::InstructionSet;

/// Stable address of a graph node.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the id was minted with.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}v{})", self.index, self.generation)
    }
}

/// One child position in a container.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    /// A scalar.
    Value(Value),
    /// A child container or invocable.
    Node(NodeId),
    /// A deleted or padded sequence position.
    Hole,
}

#[derive(Debug)]
pub(crate) enum Body {
    Object(BTreeMap<String, Slot>),
    Array(Vec<Slot>),
    Function(Invocable),
}

impl Body {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Object(_) => ValueKind::Object,
            Self::Array(_) => ValueKind::Array,
            Self::Function(_) => ValueKind::Function,
        }
    }

    /// Child node ids with their local names.
    pub fn children(&self) -> Vec<(String, NodeId)> {
        match self {
            Self::Object(map) => map
                .iter()
                .filter_map(|(k, slot)| match slot {
                    Slot::Node(id) => Some((k.clone(), *id)),
                    _ => None,
                })
                .collect(),
            Self::Array(items) => items
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| match slot {
                    Slot::Node(id) => Some((i.to_string(), *id)),
                    _ => None,
                })
                .collect(),
            Self::Function(_) => Vec::new(),
        }
    }
}

/// One namespace under which a node is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Binding {
    pub parent: Option<NodeId>,
    pub name: String,
    pub parent_namespace: String,
    pub namespace: String,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub body: Body,
    pub instructions: InstructionSet,
    pub bindings: Vec<Binding>,
    pub identity: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Node {
    pub fn new(body: Body, instructions: InstructionSet, identity: String) -> Self {
        let now = Utc::now();
        Self {
            body,
            instructions,
            bindings: Vec::new(),
            identity,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    pub fn insert(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.node = Some(node);
            return NodeId {
                index,
                generation: entry.generation,
            };
        }

        let index = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries.push(Entry {
            generation: 0,
            node: Some(node),
        });
        NodeId { index, generation: 0 }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        let entry = self.entries.get(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.node.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.node.as_mut()
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let node = entry.node.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(node)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new(Body::Object(BTreeMap::new()), InstructionSet::default(), "n".to_string())
    }

    #[test]
    fn stale_ids_do_not_resolve_after_reuse() {
        let mut arena = Arena::default();
        let first = arena.insert(node());
        assert!(arena.remove(first).is_some());

        let second = arena.insert(node());
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert!(!arena.contains(first));
        assert!(arena.contains(second));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn double_remove_is_rejected() {
        let mut arena = Arena::default();
        let id = arena.insert(node());
        assert!(arena.remove(id).is_some());
        assert!(arena.remove(id).is_none());
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn children_lists_node_slots_only() {
        let mut arena = Arena::default();
        let child = arena.insert(node());
        let body = Body::Array(vec![Slot::Value(Value::Int(1)), Slot::Hole, Slot::Node(child)]);
        assert_eq!(body.children(), vec![("2".to_string(), child)]);
        assert_eq!(body.kind(), ValueKind::Array);
    }
}
