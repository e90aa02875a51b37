//! # StateNet - Observable state with a namespace listener bus
//!
//! StateNet keeps application state in a graph of containers and publishes
//! every read, write, delete and invocation on a hierarchical listener bus.
//! Handlers subscribe to dotted namespaces and may use the `$every` and `$all`
//! selectors to observe whole branches.
//!
//! ## Core Concepts
//!
//! - **Handle**: typed access to one node through one namespace
//! - **Instructions**: per-node behaviour (`noListen`, `mutability`, `async`, ...)
//!   inherited by descendants
//! - **ListenerBus**: namespace-keyed registry with sync and deferred dispatch
//! - **Alias**: a node attached under a second key is observable under both
//!
//! ## Usage
//!
//! ```rust,ignore
//! use statenet::{build_graph, Action, GraphConfig, Handler, Value};
//! use serde_json::json;
//!
//! let root = build_graph(Value::from(json!({"toolbar": {"title": "nav"}})), GraphConfig::default())?;
//! root.subscribe(
//!     "toolbar.title",
//!     Handler::new(|event, namespace, _| println!("{namespace}: {:?}", event.value())),
//!     Action::Set,
//! )?;
//! root.child("toolbar")?.set("title", "new")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod config;
pub mod error;
pub mod graph;
pub mod namespace;
pub mod report;
pub mod value;

// Re-export primary types at crate root for convenience
pub use bus::{
    Action, ActionFilter, ApplyEvent, ArrayAction, BusConfig, DeleteEvent, DispatchMode, EventPayload, Handler,
    HandlerId, HandlerRecord, ListenerBus, ReadEvent, WriteEvent,
};
pub use config::GraphConfig;
pub use error::{ExecutionError, StateNetError, StateNetResult, ValidationError};
pub use graph::{
    build_graph, AccessPolicy, AccessRequest, AllowAll, Assignment, Entry, Handle, InstructionName,
    InstructionSet, Mutability, NodeMeta, Operation, PropertyDescriptor, StateGraph, StateGraphBuilder,
};
pub use report::{Reporter, TracingReporter};
pub use value::{Invocable, Value, ValueKind};
