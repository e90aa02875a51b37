//! Graph core: intercepted operations over the node arena.
//!
//! Every operation runs under the arena lock, collects the events it must
//! publish, releases the lock, and only then dispatches. Handlers are therefore
//! free to read, mutate, and subscribe re-entrantly.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::bus::{
    Action, ApplyEvent, ArrayAction, DeleteEvent, DispatchMode, EventPayload, ListenerBus, ReadEvent, WriteEvent,
};
use crate::error::{ExecutionError, StateNetError, StateNetResult, ValidationError};
use crate::namespace;
use crate::report::Reporter;
use crate::value::{Value, ValueKind};

use super::access::{AccessPolicy, AccessRequest, Operation};
use super::arena::{Arena, Binding, Body, Node, NodeId, Slot};
use super::build::{self, Draft};
use super::handle::{Entry, Handle, Key, NodeMeta};
use super::instructions::{InstructionName, InstructionSet};

/// Largest run of holes a single sequence write may create.
pub(crate) const MAX_SEQUENCE_GAP: usize = 1 << 16;

#[derive(Debug)]
pub(crate) struct GraphInner {
    pub arena: RwLock<Arena>,
    pub bus: Arc<ListenerBus>,
    pub reporter: Arc<dyn Reporter>,
    pub access: Arc<dyn AccessPolicy>,
    pub root: NodeId,
}

#[derive(Debug)]
struct PendingEvent {
    namespace: String,
    action: Action,
    payload: EventPayload,
    mode: DispatchMode,
}

/// A resolved position inside a container.
#[derive(Debug, Clone)]
enum Position {
    Field(String),
    Index(usize),
}

impl Position {
    fn name(&self) -> String {
        match self {
            Self::Field(k) => k.clone(),
            Self::Index(i) => i.to_string(),
        }
    }
}

/// A value on its way into the graph, resolved before the arena lock is taken.
#[derive(Debug)]
pub(crate) enum Incoming {
    Value(Value),
    Alias { node: NodeId, namespace: String },
    Foreign { snapshot: Value, namespace: String },
}

enum Prepared {
    Slot(Slot),
    Draft(Draft),
    Alias(NodeId),
}

impl GraphInner {
    /// Wraps a freshly inserted root node in its graph.
    pub fn new(
        mut arena: Arena,
        root: NodeId,
        root_namespace: &str,
        bus: Arc<ListenerBus>,
        reporter: Arc<dyn Reporter>,
        access: Arc<dyn AccessPolicy>,
    ) -> Self {
        if let Some(node) = arena.get_mut(root) {
            node.bindings.push(Binding {
                parent: None,
                name: root_namespace
                    .rsplit(namespace::SEPARATOR)
                    .next()
                    .unwrap_or(root_namespace)
                    .to_string(),
                parent_namespace: String::new(),
                namespace: root_namespace.to_string(),
            });
        }
        bind_children(&mut arena, root, &[root_namespace.to_string()]);

        Self {
            arena: RwLock::new(arena),
            bus,
            reporter,
            access,
            root,
        }
    }

    fn read(&self) -> StateNetResult<RwLockReadGuard<'_, Arena>> {
        self.arena
            .read()
            .map_err(|_| StateNetError::internal("graph lock poisoned"))
    }

    fn write(&self) -> StateNetResult<RwLockWriteGuard<'_, Arena>> {
        self.arena
            .write()
            .map_err(|_| StateNetError::internal("graph lock poisoned"))
    }

    fn authorize(&self, node: &Node, operation: Operation, namespace: &str, key: Option<&str>) -> StateNetResult<()> {
        let request = AccessRequest {
            operation,
            namespace,
            key,
            instructions: &node.instructions,
        };
        if self.access.check(&request) {
            return Ok(());
        }
        Err(StateNetError::Execution(ExecutionError::UnauthorizedAccess {
            operation: operation.as_str().to_string(),
            namespace: key.map_or_else(|| namespace.to_string(), |k| namespace::join(namespace, k)),
        }))
    }

    /// Hands one intercepted operation to the reporting sink.
    fn trace(&self, operation: Operation, ns: &str, key: Option<&str>) {
        let target = key.map_or_else(|| ns.to_string(), |k| namespace::join(ns, k));
        self.reporter.trace(&format!("{} {target}", operation.as_str()));
    }

    pub fn node_count(&self) -> StateNetResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.read().is_ok_and(|arena| arena.contains(id))
    }

    pub fn get(self: &Arc<Self>, id: NodeId, ns: &str, key: &Key) -> StateNetResult<Option<Entry>> {
        if let Some(name) = instruction_key(key)? {
            let value = self.instruction(id, ns, name)?;
            return Ok((!value.is_null()).then_some(Entry::Value(value)));
        }

        let (entry, events) = {
            let arena = self.read()?;
            let node = node_ref(&arena, id, ns)?;
            let pos = resolve(&node.body, key, ns)?;
            let name = pos.name();
            self.authorize(node, Operation::Get, ns, Some(&name))?;
            self.trace(Operation::Get, ns, Some(&name));

            let (entry, child) = match lookup(&node.body, &pos) {
                None | Some(Slot::Hole) => return Ok(None),
                Some(Slot::Value(v)) => (Entry::Value(v.clone()), None),
                Some(Slot::Node(child)) => (
                    Entry::Node(Handle::new(Arc::clone(self), *child, namespace::join(ns, &name))),
                    Some(*child),
                ),
            };

            let mut value = None;
            let events = self.events_for(node, &name, Action::Get, |namespace, parent_namespace| {
                let value = value
                    .get_or_insert_with(|| match (&entry, child) {
                        (Entry::Value(v), _) => v.clone(),
                        (_, Some(child)) => snapshot(&arena, child),
                        _ => Value::Null,
                    })
                    .clone();
                EventPayload::Get(ReadEvent {
                    namespace,
                    name: name.clone(),
                    parent_namespace,
                    miss: false,
                    value,
                })
            });
            (entry, events)
        };

        self.emit(events);
        Ok(Some(entry))
    }

    pub fn set(self: &Arc<Self>, id: NodeId, ns: &str, key: &Key, incoming: Incoming) -> StateNetResult<()> {
        if let Some(name) = instruction_key(key)? {
            let Incoming::Value(value) = incoming else {
                return Err(StateNetError::Validation(ValidationError::InvalidInstructionValue {
                    name: name.as_str().to_string(),
                    reason: "instructions take plain values, not nodes".to_string(),
                }));
            };
            return self.set_instruction(id, ns, name, &value);
        }

        let events = {
            let mut arena = self.write()?;
            let node = node_ref(&arena, id, ns)?;
            let pos = resolve(&node.body, key, ns)?;
            let name = pos.name();
            let target = namespace::join(ns, &name);
            match (&node.body, &pos) {
                (_, Position::Field(k)) => build::validate_key(k)?,
                (Body::Array(items), Position::Index(i)) => check_sequence_index(*i, items.len())?,
                _ => {}
            }
            self.authorize(node, Operation::Set, ns, Some(&name))?;
            self.trace(Operation::Set, ns, Some(&name));

            let current = lookup(&node.body, &pos).cloned();
            let existed = matches!(current, Some(Slot::Value(_) | Slot::Node(_)));
            check_writable(node, &name, existed, &target)?;

            let array_action = match (&node.body, &pos) {
                (Body::Array(items), Position::Index(i)) => Some(classify_index(*i, items.len())),
                _ => None,
            };
            let old_value = current.as_ref().and_then(|slot| slot_value(&arena, slot));
            let instructions = node.instructions.clone();

            let prepared = match incoming {
                Incoming::Value(v) if v.is_node_kind() => Prepared::Draft(build::draft(v, &instructions, None)?),
                Incoming::Value(v) => Prepared::Slot(Slot::Value(v)),
                Incoming::Alias { node: alias, namespace } => {
                    if !arena.contains(alias) {
                        return Err(StateNetError::Execution(ExecutionError::DetachedNode { namespace }));
                    }
                    if is_ancestor_or_self(&arena, alias, id) {
                        return Err(StateNetError::Execution(ExecutionError::CyclicReference {
                            source_namespace: namespace,
                            target_namespace: target,
                        }));
                    }
                    Prepared::Alias(alias)
                }
                Incoming::Foreign { snapshot, namespace } => {
                    if !instructions.severs_external_refs() {
                        return Err(StateNetError::Execution(ExecutionError::ExternalReference {
                            namespace,
                            reason: "handle belongs to another graph and noExternalRef is false".to_string(),
                        }));
                    }
                    Prepared::Draft(build::draft(snapshot, &instructions, None)?)
                }
            };

            let new_slot = match prepared {
                Prepared::Slot(slot) => slot,
                Prepared::Draft(draft) => Slot::Node(build::insert(&mut arena, draft)),
                Prepared::Alias(alias) => Slot::Node(alias),
            };
            let value = slot_value(&arena, &new_slot).unwrap_or_default();
            let type_change = existed && old_value.as_ref().map(Value::kind) != Some(value.kind());
            let new_child = match &new_slot {
                Slot::Node(child) => Some(*child),
                _ => None,
            };
            let old_child = match current {
                Some(Slot::Node(child)) => Some(child),
                _ => None,
            };

            let parent_namespaces = {
                let node = node_mut(&mut arena, id, ns)?;
                store(&mut node.body, &pos, new_slot);
                node.touch();
                binding_namespaces(node)
            };
            if new_child != old_child {
                if let Some(child) = new_child {
                    bind(&mut arena, child, id, &name, &parent_namespaces);
                }
                if let Some(child) = old_child {
                    unbind(&mut arena, child, id, &child_namespaces(&parent_namespaces, &name));
                }
            }

            let node = node_ref(&arena, id, ns)?;
            self.events_for(node, &name, Action::Set, |namespace, parent_namespace| {
                EventPayload::Set(WriteEvent {
                    namespace,
                    name: name.clone(),
                    parent_namespace,
                    miss: !existed,
                    type_change,
                    array_action,
                    value: value.clone(),
                    old_value: old_value.clone(),
                })
            })
        };

        self.emit(events);
        Ok(())
    }

    pub fn delete(self: &Arc<Self>, id: NodeId, ns: &str, key: &Key) -> StateNetResult<bool> {
        if let Some(name) = instruction_key(key)? {
            return Err(StateNetError::Execution(ExecutionError::InvalidInstructionOperation {
                name: name.as_str().to_string(),
                operation: "delete".to_string(),
            }));
        }

        let (existed, events) = {
            let mut arena = self.write()?;
            let node = node_ref(&arena, id, ns)?;
            let pos = resolve(&node.body, key, ns)?;
            let name = pos.name();
            let target = namespace::join(ns, &name);
            self.authorize(node, Operation::Delete, ns, Some(&name))?;
            self.trace(Operation::Delete, ns, Some(&name));

            let current = lookup(&node.body, &pos).cloned();
            let existed = matches!(current, Some(Slot::Value(_) | Slot::Node(_)));
            if existed {
                check_deletable(node, &name, &target)?;
            }
            let array_action = matches!(node.body, Body::Array(_)).then_some(ArrayAction::Delete);
            let old_value = current.as_ref().and_then(|slot| slot_value(&arena, slot));

            let parent_namespaces = {
                let node = node_mut(&mut arena, id, ns)?;
                if existed {
                    remove(&mut node.body, &pos);
                    node.touch();
                }
                binding_namespaces(node)
            };
            if let Some(Slot::Node(child)) = current {
                unbind(&mut arena, child, id, &child_namespaces(&parent_namespaces, &name));
            }

            let node = node_ref(&arena, id, ns)?;
            let events = self.events_for(node, &name, Action::Delete, |namespace, parent_namespace| {
                EventPayload::Delete(DeleteEvent {
                    namespace,
                    name: name.clone(),
                    parent_namespace,
                    miss: !existed,
                    array_action,
                    old_value: old_value.clone(),
                    success: true,
                })
            });
            (existed, events)
        };

        self.emit(events);
        Ok(existed)
    }

    pub fn invoke(&self, id: NodeId, ns: &str, args: &[Value]) -> StateNetResult<Value> {
        let (func, receiver, silent, mode, namespaces) = {
            let arena = self.read()?;
            let node = node_ref(&arena, id, ns)?;
            let Body::Function(func) = &node.body else {
                return Err(StateNetError::Execution(ExecutionError::NotInvocable {
                    namespace: ns.to_string(),
                }));
            };
            self.authorize(node, Operation::Apply, ns, None)?;
            self.trace(Operation::Apply, ns, None);

            let receiver = node
                .bindings
                .first()
                .and_then(|b| b.parent)
                .map_or(Value::Null, |parent| snapshot(&arena, parent));
            (
                func.clone(),
                receiver,
                node.instructions.is_silent(),
                node.instructions.dispatch_mode(),
                binding_namespaces(node),
            )
        };

        let result = func.call(&receiver, args);

        if !silent {
            let events = namespaces
                .into_iter()
                .map(|namespace| PendingEvent {
                    payload: EventPayload::Apply(ApplyEvent {
                        namespace: namespace.clone(),
                        scope: receiver.clone(),
                        arguments: args.to_vec(),
                    }),
                    namespace,
                    action: Action::Apply,
                    mode,
                })
                .collect();
            self.emit(events);
        }
        Ok(result)
    }

    pub fn keys(&self, id: NodeId, ns: &str) -> StateNetResult<Vec<String>> {
        let arena = self.read()?;
        let node = node_ref(&arena, id, ns)?;
        self.authorize(node, Operation::Inspect, ns, None)?;
        Ok(match &node.body {
            Body::Object(map) => map
                .keys()
                .filter(|k| node.instructions.descriptor(k).map_or(true, |d| d.enumerable))
                .cloned()
                .collect(),
            Body::Array(items) => items
                .iter()
                .enumerate()
                .filter(|(_, slot)| !matches!(slot, Slot::Hole))
                .map(|(i, _)| i.to_string())
                .collect(),
            Body::Function(_) => Vec::new(),
        })
    }

    pub fn contains(&self, id: NodeId, ns: &str, key: &Key) -> StateNetResult<bool> {
        let arena = self.read()?;
        let node = node_ref(&arena, id, ns)?;
        let pos = resolve(&node.body, key, ns)?;
        self.authorize(node, Operation::Inspect, ns, Some(&pos.name()))?;
        Ok(matches!(lookup(&node.body, &pos), Some(Slot::Value(_) | Slot::Node(_))))
    }

    pub fn len(&self, id: NodeId, ns: &str) -> StateNetResult<usize> {
        let arena = self.read()?;
        let node = node_ref(&arena, id, ns)?;
        match &node.body {
            Body::Object(map) => Ok(map.len()),
            Body::Array(items) => Ok(items.len()),
            Body::Function(_) => Err(StateNetError::Execution(ExecutionError::NotAContainer {
                namespace: ns.to_string(),
            })),
        }
    }

    pub fn kind(&self, id: NodeId, ns: &str) -> StateNetResult<ValueKind> {
        let arena = self.read()?;
        Ok(node_ref(&arena, id, ns)?.body.kind())
    }

    pub fn snapshot(&self, id: NodeId, ns: &str) -> StateNetResult<Value> {
        let arena = self.read()?;
        let node = node_ref(&arena, id, ns)?;
        self.authorize(node, Operation::Inspect, ns, None)?;
        Ok(snapshot(&arena, id))
    }

    pub fn meta(&self, id: NodeId, ns: &str) -> StateNetResult<NodeMeta> {
        let arena = self.read()?;
        let node = node_ref(&arena, id, ns)?;
        let primary = node.bindings.first();
        Ok(NodeMeta {
            name: primary.map(|b| b.name.clone()).unwrap_or_default(),
            namespace: primary.map(|b| b.namespace.clone()).unwrap_or_default(),
            parent_namespace: primary.map(|b| b.parent_namespace.clone()).unwrap_or_default(),
            aliases: binding_namespaces(node),
            kind: node.body.kind(),
            identity: node.identity.clone(),
            created_at: node.created_at,
            modified_at: node.modified_at,
            instructions: node.instructions.clone(),
        })
    }

    pub fn instruction(&self, id: NodeId, ns: &str, name: InstructionName) -> StateNetResult<Value> {
        let arena = self.read()?;
        let node = node_ref(&arena, id, ns)?;
        Ok(node.instructions.get(name))
    }

    pub fn set_instruction(&self, id: NodeId, ns: &str, name: InstructionName, value: &Value) -> StateNetResult<()> {
        let mut arena = self.write()?;
        let node = node_ref(&arena, id, ns)?;
        self.authorize(node, Operation::Configure, ns, Some(name.as_str()))?;
        self.trace(Operation::Configure, ns, Some(name.as_str()));
        let node = node_mut(&mut arena, id, ns)?;
        node.instructions.set(name, value)?;
        node.touch();
        tracing::debug!(namespace = %ns, instruction = %name, "instruction changed");
        Ok(())
    }

    /// Builds one pending event per binding of `node`, unless it is silent or unobserved.
    fn events_for(
        &self,
        node: &Node,
        name: &str,
        action: Action,
        mut payload: impl FnMut(String, String) -> EventPayload,
    ) -> Vec<PendingEvent> {
        if node.instructions.is_silent() {
            return Vec::new();
        }
        let mode = node.instructions.dispatch_mode();
        node.bindings
            .iter()
            .filter_map(|b| {
                let namespace = namespace::join(&b.namespace, name);
                match self.bus.has_subscriber(&namespace) {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(err) => {
                        self.reporter.error(&err);
                        return None;
                    }
                }
                Some(PendingEvent {
                    payload: payload(namespace.clone(), b.namespace.clone()),
                    namespace,
                    action,
                    mode,
                })
            })
            .collect()
    }

    fn emit(&self, events: Vec<PendingEvent>) {
        for event in events {
            if let Err(err) = self
                .bus
                .dispatch_with(&event.namespace, event.action, event.payload, event.mode)
            {
                self.reporter.error(&err);
            }
        }
    }
}

fn detached(ns: &str) -> StateNetError {
    StateNetError::Execution(ExecutionError::DetachedNode {
        namespace: ns.to_string(),
    })
}

fn node_ref<'a>(arena: &'a Arena, id: NodeId, ns: &str) -> StateNetResult<&'a Node> {
    arena.get(id).ok_or_else(|| detached(ns))
}

fn node_mut<'a>(arena: &'a mut Arena, id: NodeId, ns: &str) -> StateNetResult<&'a mut Node> {
    arena.get_mut(id).ok_or_else(|| detached(ns))
}

fn resolve(body: &Body, key: &Key, ns: &str) -> StateNetResult<Position> {
    match (body, key) {
        (Body::Object(_), Key::Name(k)) => Ok(Position::Field(k.clone())),
        (Body::Object(_), Key::Index(i)) => Ok(Position::Field(i.to_string())),
        (Body::Array(_), Key::Index(i)) => Ok(Position::Index(*i)),
        (Body::Array(_), Key::Name(k)) => k.parse::<usize>().map(Position::Index).map_err(|_| {
            StateNetError::Validation(ValidationError::InvalidKey {
                key: k.clone(),
                reason: "sequence keys must be indices".to_string(),
            })
        }),
        (Body::Function(_), _) => Err(StateNetError::Execution(ExecutionError::NotAContainer {
            namespace: ns.to_string(),
        })),
    }
}

/// Recognizes a `__`-prefixed key; these address the node's instructions, never its data.
fn instruction_key(key: &Key) -> StateNetResult<Option<InstructionName>> {
    match key {
        Key::Name(k) => InstructionName::from_data_key(k),
        Key::Index(_) => Ok(None),
    }
}

/// Rejects sequence writes that would pad more than `MAX_SEQUENCE_GAP` holes.
fn check_sequence_index(index: usize, len: usize) -> StateNetResult<()> {
    match len.checked_add(MAX_SEQUENCE_GAP) {
        Some(limit) if index <= limit => Ok(()),
        _ => Err(StateNetError::Validation(ValidationError::InvalidKey {
            key: index.to_string(),
            reason: format!("index is more than {MAX_SEQUENCE_GAP} past the sequence length {len}"),
        })),
    }
}

fn lookup<'a>(body: &'a Body, pos: &Position) -> Option<&'a Slot> {
    match (body, pos) {
        (Body::Object(map), Position::Field(k)) => map.get(k),
        (Body::Array(items), Position::Index(i)) => items.get(*i),
        _ => None,
    }
}

fn store(body: &mut Body, pos: &Position, slot: Slot) {
    match (body, pos) {
        (Body::Object(map), Position::Field(k)) => {
            map.insert(k.clone(), slot);
        }
        (Body::Array(items), Position::Index(i)) => {
            if *i >= items.len() {
                items.resize(*i + 1, Slot::Hole);
            }
            items[*i] = slot;
        }
        _ => {}
    }
}

fn remove(body: &mut Body, pos: &Position) {
    match (body, pos) {
        (Body::Object(map), Position::Field(k)) => {
            map.remove(k);
        }
        (Body::Array(items), Position::Index(i)) => {
            if let Some(slot) = items.get_mut(*i) {
                *slot = Slot::Hole;
            }
        }
        _ => {}
    }
}

fn classify_index(index: usize, len: usize) -> ArrayAction {
    match index.cmp(&len) {
        std::cmp::Ordering::Equal => ArrayAction::Append,
        std::cmp::Ordering::Less => ArrayAction::Replace,
        std::cmp::Ordering::Greater => ArrayAction::Set,
    }
}

fn immutable(operation: &str, target: &str, reason: &str) -> StateNetError {
    StateNetError::Execution(ExecutionError::ImmutableViolation {
        operation: operation.to_string(),
        namespace: target.to_string(),
        reason: reason.to_string(),
    })
}

fn check_writable(node: &Node, name: &str, existed: bool, target: &str) -> StateNetResult<()> {
    let level = node.instructions.mutability_level();
    if !level.allows_write() {
        return Err(immutable("set", target, "node is frozen"));
    }
    if !existed && !level.allows_add() {
        return Err(immutable("set", target, &format!("node is {} and rejects new keys", level.as_str())));
    }
    if existed && node.instructions.descriptor(name).is_some_and(|d| !d.writable) {
        return Err(immutable("set", target, "property is not writable"));
    }
    Ok(())
}

fn check_deletable(node: &Node, name: &str, target: &str) -> StateNetResult<()> {
    let level = node.instructions.mutability_level();
    if !level.allows_delete() {
        return Err(immutable("delete", target, &format!("node is {}", level.as_str())));
    }
    if node.instructions.descriptor(name).is_some_and(|d| !d.configurable) {
        return Err(immutable("delete", target, "property is not configurable"));
    }
    Ok(())
}

fn binding_namespaces(node: &Node) -> Vec<String> {
    node.bindings.iter().map(|b| b.namespace.clone()).collect()
}

fn child_namespaces(parent_namespaces: &[String], name: &str) -> Vec<String> {
    parent_namespaces
        .iter()
        .map(|ns| namespace::join(ns, name))
        .collect()
}

/// Attaches `id` under `parent` as `name`, once per parent namespace, and
/// extends the bindings of every descendant.
fn bind(arena: &mut Arena, id: NodeId, parent: NodeId, name: &str, parent_namespaces: &[String]) {
    let Some(node) = arena.get_mut(id) else {
        return;
    };

    let mut added = Vec::new();
    for parent_namespace in parent_namespaces {
        let namespace = namespace::join(parent_namespace, name);
        let exists = node
            .bindings
            .iter()
            .any(|b| b.parent == Some(parent) && b.namespace == namespace);
        if exists {
            continue;
        }
        node.bindings.push(Binding {
            parent: Some(parent),
            name: name.to_string(),
            parent_namespace: parent_namespace.clone(),
            namespace: namespace.clone(),
        });
        added.push(namespace);
    }

    if !added.is_empty() {
        bind_children(arena, id, &added);
    }
}

fn bind_children(arena: &mut Arena, id: NodeId, namespaces: &[String]) {
    let children = arena.get(id).map(|n| n.body.children()).unwrap_or_default();
    for (key, child) in children {
        bind(arena, child, id, &key, namespaces);
    }
}

/// Removes the bindings of `id` under `parent` for `namespaces`, recursing into
/// descendants. A node left without bindings is freed.
fn unbind(arena: &mut Arena, id: NodeId, parent: NodeId, namespaces: &[String]) {
    let Some(node) = arena.get_mut(id) else {
        return;
    };

    let mut removed = Vec::new();
    node.bindings.retain(|b| {
        let hit = b.parent == Some(parent) && namespaces.contains(&b.namespace);
        if hit {
            removed.push(b.namespace.clone());
        }
        !hit
    });
    if removed.is_empty() {
        return;
    }

    let orphaned = node.bindings.is_empty();
    for (key, child) in node.body.children() {
        unbind(arena, child, id, &child_namespaces(&removed, &key));
    }
    if orphaned {
        arena.remove(id);
    }
}

/// True when `candidate` is `start` or one of its ancestors under any binding.
fn is_ancestor_or_self(arena: &Arena, candidate: NodeId, start: NodeId) -> bool {
    let mut stack = vec![start];
    let mut seen = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == candidate {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        if let Some(node) = arena.get(current) {
            stack.extend(node.bindings.iter().filter_map(|b| b.parent));
        }
    }
    false
}

fn slot_value(arena: &Arena, slot: &Slot) -> Option<Value> {
    match slot {
        Slot::Value(v) => Some(v.clone()),
        Slot::Node(id) => Some(snapshot(arena, *id)),
        Slot::Hole => None,
    }
}

/// Exports a node as a plain value. Holes become `Null`.
pub(crate) fn snapshot(arena: &Arena, id: NodeId) -> Value {
    let Some(node) = arena.get(id) else {
        return Value::Null;
    };
    match &node.body {
        Body::Object(map) => Value::Object(
            map.iter()
                .map(|(k, slot)| (k.clone(), slot_value(arena, slot).unwrap_or_default()))
                .collect(),
        ),
        Body::Array(items) => Value::Array(
            items
                .iter()
                .map(|slot| slot_value(arena, slot).unwrap_or_default())
                .collect(),
        ),
        Body::Function(func) => Value::Function(func.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build;
    use crate::report::testing::CollectingReporter;
    use serde_json::json;

    fn arena_with(seed: serde_json::Value) -> (Arena, NodeId) {
        let mut arena = Arena::default();
        let draft = build::draft(Value::from(seed), &InstructionSet::default(), None).unwrap();
        let root = build::insert(&mut arena, draft);
        arena.get_mut(root).unwrap().bindings.push(Binding {
            parent: None,
            name: "$".to_string(),
            parent_namespace: String::new(),
            namespace: "$".to_string(),
        });
        bind_children(&mut arena, root, &["$".to_string()]);
        (arena, root)
    }

    fn child(arena: &Arena, id: NodeId, key: &str) -> NodeId {
        match &arena.get(id).unwrap().body {
            Body::Object(map) => match map.get(key) {
                Some(Slot::Node(c)) => *c,
                other => panic!("no node at {key}: {other:?}"),
            },
            Body::Array(items) => match items.get(key.parse::<usize>().unwrap()) {
                Some(Slot::Node(c)) => *c,
                other => panic!("no node at {key}: {other:?}"),
            },
            Body::Function(_) => panic!("function has no children"),
        }
    }

    fn graph_with(seed: serde_json::Value) -> (crate::graph::StateGraph, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::default());
        let graph = crate::graph::StateGraph::builder()
            .reporter(reporter.clone())
            .build(Value::from(seed))
            .unwrap();
        (graph, reporter)
    }

    #[test]
    fn intercepted_operations_reach_the_reporter() {
        let (graph, reporter) = graph_with(json!({"a": 1, "f": {}}));
        let root = graph.root();
        root.get("a").unwrap();
        root.set("b", 2).unwrap();
        root.delete("b").unwrap();
        root.set_instruction(InstructionName::Async, true).unwrap();

        assert_eq!(
            *reporter.traces.lock().unwrap(),
            vec!["get $.a", "set $.b", "delete $.b", "configure $.async"]
        );
    }

    #[test]
    fn poisoned_bus_is_reported_and_the_write_still_lands() {
        let (graph, reporter) = graph_with(json!({"a": 1}));
        let root = graph.root();
        graph.bus().poison_state();

        root.set("a", 2).unwrap();
        assert_eq!(root.get("a").unwrap().unwrap().as_value(), Some(&Value::from(2)));
        let errors = reporter.errors.lock().unwrap();
        assert!(!errors.is_empty());
        assert!(errors.iter().all(|e| e.contains("poisoned")));
    }

    #[test]
    fn far_sequence_indices_are_rejected_before_mutating() {
        let (graph, _) = graph_with(json!({"list": [1, 2]}));
        let list = graph.root().child("list").unwrap();

        for index in [usize::MAX, 1 << 40, 2 + MAX_SEQUENCE_GAP + 1] {
            let err = list.set(index, 1).unwrap_err();
            assert!(
                matches!(err, StateNetError::Validation(ValidationError::InvalidKey { .. })),
                "{index}: {err}"
            );
        }
        assert_eq!(list.len().unwrap(), 2);

        list.set(2 + MAX_SEQUENCE_GAP, 3).unwrap();
        assert_eq!(list.len().unwrap(), 3 + MAX_SEQUENCE_GAP);
        assert!(list.set(0, 9).is_ok());
    }

    #[test]
    fn binding_namespaces_follow_the_tree() {
        let (arena, root) = arena_with(json!({"a": {"b": [{"c": 1}]}}));
        let a = child(&arena, root, "a");
        let b = child(&arena, a, "b");
        let item = child(&arena, b, "0");
        assert_eq!(binding_namespaces(arena.get(item).unwrap()), vec!["$.a.b.0"]);
        assert_eq!(arena.get(item).unwrap().bindings[0].parent_namespace, "$.a.b");
    }

    #[test]
    fn alias_binding_extends_descendants_and_unbind_frees() {
        let (mut arena, root) = arena_with(json!({"items": [{"tags": {"x": 1}}], "current": null}));
        let items = child(&arena, root, "items");
        let first = child(&arena, items, "0");
        let tags = child(&arena, first, "tags");

        bind(&mut arena, first, root, "current", &["$".to_string()]);
        assert_eq!(
            binding_namespaces(arena.get(tags).unwrap()),
            vec!["$.items.0.tags", "$.current.tags"]
        );

        unbind(&mut arena, first, items, &["$.items.0".to_string()]);
        assert_eq!(binding_namespaces(arena.get(tags).unwrap()), vec!["$.current.tags"]);

        unbind(&mut arena, first, root, &["$.current".to_string()]);
        assert!(!arena.contains(first));
        assert!(!arena.contains(tags));
    }

    #[test]
    fn ancestor_detection_crosses_aliases() {
        let (arena, root) = arena_with(json!({"a": {"b": {}}}));
        let a = child(&arena, root, "a");
        let b = child(&arena, a, "b");
        assert!(is_ancestor_or_self(&arena, a, b));
        assert!(is_ancestor_or_self(&arena, b, b));
        assert!(!is_ancestor_or_self(&arena, b, a));
    }

    #[test]
    fn index_classification() {
        assert_eq!(classify_index(2, 2), ArrayAction::Append);
        assert_eq!(classify_index(0, 2), ArrayAction::Replace);
        assert_eq!(classify_index(5, 2), ArrayAction::Set);
    }

    #[test]
    fn snapshot_turns_holes_into_null() {
        let (mut arena, root) = arena_with(json!({"list": [1, 2, 3]}));
        let list = child(&arena, root, "list");
        remove(&mut arena.get_mut(list).unwrap().body, &Position::Index(1));
        assert_eq!(snapshot(&arena, list), Value::from(json!([1, null, 3])));
    }
}
