//! Namespace listener bus.
//!
//! Handlers subscribe to literal namespaces (`$.toolbar.title`) or wildcard
//! namespaces (`$.items.$every.name`, `$.main.$all`). Dispatch to a literal
//! namespace reaches the handlers registered exactly there, then every ancestor
//! wildcard whose pattern accepts it.

/// Registration trie, lookup, and dispatch worker.
pub mod dispatcher;
/// Change descriptors.
pub mod event;
/// Handler records and identifiers.
pub mod handler;
mod trie;

pub use dispatcher::{BusConfig, DispatchMode, ListenerBus};
pub use event::{ApplyEvent, ArrayAction, DeleteEvent, EventPayload, ReadEvent, WriteEvent};
pub use handler::{Action, ActionFilter, Handler, HandlerId, HandlerRecord};
