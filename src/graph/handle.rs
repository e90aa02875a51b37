//! Handles: the typed access surface of the graph.
//!
//! A `Handle` addresses one node through one of its namespaces. Every data
//! operation on it is intercepted and published on the graph's listener bus.
//! Bus operations (`subscribe`, `unsubscribe`, ...) are a separate capability
//! and never share the node's key space.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bus::{ActionFilter, Handler, HandlerId, HandlerRecord, ListenerBus};
use crate::error::{ExecutionError, StateNetError, StateNetResult};
use crate::namespace;
use crate::value::{Invocable, ObjectMap, Value, ValueKind};

use super::arena::NodeId;
use super::instructions::{InstructionName, InstructionSet};
use super::state::{GraphInner, Incoming};

/// A key into a container: an object field or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Object field (or a sequence index written as text).
    Name(String),
    /// Sequence index (or an object field named by digits).
    Index(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(k) => f.write_str(k),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self::Name(key.to_string())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self::Name(key)
    }
}

impl From<&String> for Key {
    fn from(key: &String) -> Self {
        Self::Name(key.clone())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// What a read returns: a scalar, or a handle to a child node.
#[derive(Debug, Clone)]
pub enum Entry {
    /// A scalar slot.
    Value(Value),
    /// A child container or invocable.
    Node(Handle),
}

impl Entry {
    /// The scalar, if this is not a node.
    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Node(_) => None,
        }
    }

    /// The child handle, if this is a node.
    #[must_use]
    pub const fn as_handle(&self) -> Option<&Handle> {
        match self {
            Self::Node(h) => Some(h),
            Self::Value(_) => None,
        }
    }

    /// Consumes the entry, returning the child handle if this is a node.
    #[must_use]
    pub fn into_handle(self) -> Option<Handle> {
        match self {
            Self::Node(h) => Some(h),
            Self::Value(_) => None,
        }
    }

    /// The entry as a plain value; nodes are snapshotted.
    pub fn to_value(&self) -> StateNetResult<Value> {
        match self {
            Self::Value(v) => Ok(v.clone()),
            Self::Node(h) => h.snapshot(),
        }
    }
}

/// The right-hand side of a write.
#[derive(Debug, Clone)]
pub enum Assignment {
    /// A plain value; containers are taken into the graph as new nodes.
    Value(Value),
    /// An existing node, attached by reference when it belongs to the same graph.
    Node(Handle),
}

macro_rules! assign_value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Assignment {
                fn from(value: $ty) -> Self {
                    Self::Value(Value::from(value))
                }
            }
        )*
    };
}

assign_value_from!(bool, i32, i64, u32, f64, String, &str, Vec<Value>, ObjectMap, Invocable, serde_json::Value);

impl From<Value> for Assignment {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Handle> for Assignment {
    fn from(handle: Handle) -> Self {
        Self::Node(handle)
    }
}

impl From<&Handle> for Assignment {
    fn from(handle: &Handle) -> Self {
        Self::Node(handle.clone())
    }
}

/// Descriptive metadata of a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMeta {
    /// Local name under the primary binding.
    pub name: String,
    /// Primary namespace.
    pub namespace: String,
    pub parent_namespace: String,
    /// Every namespace currently bound to the node, primary first.
    pub aliases: Vec<String>,
    pub kind: ValueKind,
    pub identity: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Resolved instructions.
    pub instructions: InstructionSet,
}

/// A reference to one node of a state graph, seen through one namespace.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<GraphInner>,
    node: NodeId,
    namespace: String,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("namespace", &self.namespace)
            .field("node", &self.node)
            .finish()
    }
}

impl Handle {
    pub(crate) fn new(inner: Arc<GraphInner>, node: NodeId, namespace: String) -> Self {
        Self { inner, node, namespace }
    }

    /// The namespace this handle was reached through.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The node's arena id.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node
    }

    /// Whether the node is still part of its graph.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.is_attached(self.node)
    }

    /// Whether both handles address the same node of the same graph.
    #[must_use]
    pub fn same_node(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) && self.node == other.node
    }

    /// The graph's listener bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<ListenerBus> {
        &self.inner.bus
    }

    /// Reads a key. Missing keys and holes return `None` without an event.
    pub fn get(&self, key: impl Into<Key>) -> StateNetResult<Option<Entry>> {
        self.inner.get(self.node, &self.namespace, &key.into())
    }

    /// Reads a key and returns the child handle, failing if it is not a node.
    pub fn child(&self, key: impl Into<Key>) -> StateNetResult<Handle> {
        let key = key.into();
        match self.get(key.clone())? {
            Some(Entry::Node(h)) => Ok(h),
            _ => Err(StateNetError::Execution(ExecutionError::NotAContainer {
                namespace: namespace::join(&self.namespace, &key.to_string()),
            })),
        }
    }

    /// Writes a key.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Assignment>) -> StateNetResult<()> {
        let incoming = match value.into() {
            Assignment::Value(v) => Incoming::Value(v),
            Assignment::Node(h) if Arc::ptr_eq(&h.inner, &self.inner) => Incoming::Alias {
                node: h.node,
                namespace: h.namespace,
            },
            Assignment::Node(h) => Incoming::Foreign {
                snapshot: h.snapshot()?,
                namespace: h.namespace,
            },
        };
        self.inner.set(self.node, &self.namespace, &key.into(), incoming)
    }

    /// Deletes a key. Returns whether a value was present.
    pub fn delete(&self, key: impl Into<Key>) -> StateNetResult<bool> {
        self.inner.delete(self.node, &self.namespace, &key.into())
    }

    /// Calls an invocable node with the parent container as receiver.
    pub fn invoke(&self, args: &[Value]) -> StateNetResult<Value> {
        self.inner.invoke(self.node, &self.namespace, args)
    }

    /// Enumerable own keys; sequence holes are skipped.
    pub fn keys(&self) -> StateNetResult<Vec<String>> {
        self.inner.keys(self.node, &self.namespace)
    }

    pub fn contains(&self, key: impl Into<Key>) -> StateNetResult<bool> {
        self.inner.contains(self.node, &self.namespace, &key.into())
    }

    /// Field count, or sequence length including holes.
    pub fn len(&self) -> StateNetResult<usize> {
        self.inner.len(self.node, &self.namespace)
    }

    pub fn is_empty(&self) -> StateNetResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn kind(&self) -> StateNetResult<ValueKind> {
        self.inner.kind(self.node, &self.namespace)
    }

    /// Appends to a sequence.
    pub fn push(&self, value: impl Into<Assignment>) -> StateNetResult<()> {
        let len = self.len()?;
        self.set(len, value)
    }

    /// Walks a dotted relative path, reading one key per segment.
    pub fn at(&self, path: &str) -> StateNetResult<Option<Entry>> {
        let mut current = self.clone();
        let mut segments = path.split(namespace::SEPARATOR).peekable();
        while let Some(segment) = segments.next() {
            let entry = current.get(segment)?;
            if segments.peek().is_none() {
                return Ok(entry);
            }
            match entry {
                Some(Entry::Node(h)) => current = h,
                _ => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Exports the node as a plain value without publishing events.
    pub fn snapshot(&self) -> StateNetResult<Value> {
        self.inner.snapshot(self.node, &self.namespace)
    }

    pub fn meta(&self) -> StateNetResult<NodeMeta> {
        self.inner.meta(self.node, &self.namespace)
    }

    /// The node's identity token.
    pub fn identity(&self) -> StateNetResult<String> {
        Ok(self.meta()?.identity)
    }

    /// Reads one resolved instruction; `Null` when unset.
    pub fn instruction(&self, name: InstructionName) -> StateNetResult<Value> {
        self.inner.instruction(self.node, &self.namespace, name)
    }

    /// Changes one instruction on this node. Existing children are not affected.
    pub fn set_instruction(&self, name: InstructionName, value: impl Into<Value>) -> StateNetResult<()> {
        self.inner
            .set_instruction(self.node, &self.namespace, name, &value.into())
    }

    fn scoped(&self, relative: &str) -> String {
        namespace::join(&self.namespace, relative)
    }

    /// Subscribes relative to this handle's namespace; `""` means the node itself.
    pub fn subscribe(
        &self,
        relative: &str,
        handler: Handler,
        actions: impl Into<ActionFilter>,
    ) -> StateNetResult<Vec<HandlerId>> {
        self.inner.bus.subscribe(&self.scoped(relative), handler, actions)
    }

    /// Subscribes every handler at every relative namespace.
    pub fn subscribe_all<S: AsRef<str>>(
        &self,
        relatives: &[S],
        handlers: &[Handler],
        actions: impl Into<ActionFilter>,
    ) -> StateNetResult<Vec<HandlerId>> {
        let scoped: Vec<String> = relatives.iter().map(|r| self.scoped(r.as_ref())).collect();
        self.inner.bus.subscribe_all(&scoped, handlers, actions)
    }

    /// Removes handlers by id, wherever they were registered.
    pub fn unsubscribe(&self, ids: &[HandlerId]) -> StateNetResult<HashMap<HandlerId, HandlerRecord>> {
        self.inner.bus.unsubscribe(ids)
    }

    /// Removes only the handlers registered at or below this handle's namespace.
    pub fn unsubscribe_scoped(&self, ids: &[HandlerId]) -> StateNetResult<HashMap<HandlerId, HandlerRecord>> {
        self.inner.bus.unsubscribe_within(&self.namespace, ids)
    }

    pub fn has_subscriber(&self, relative: &str) -> StateNetResult<bool> {
        self.inner.bus.has_subscriber(&self.scoped(relative))
    }

    /// Waits for deferred dispatches queued so far.
    pub fn flush(&self) -> StateNetResult<()> {
        self.inner.bus.flush()
    }
}
