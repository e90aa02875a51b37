//! Observed state graph.
//!
//! The graph stores a nested value tree in an arena of nodes. Reads, writes,
//! deletes and invocations go through `Handle`s; each one is classified and
//! published on the listener bus under every namespace the affected node is
//! bound to.

/// Access-control extension point.
pub mod access;
mod arena;
mod build;
/// Handle types.
pub mod handle;
/// Node instructions.
pub mod instructions;
mod state;

use std::sync::Arc;

use crate::bus::ListenerBus;
use crate::config::GraphConfig;
use crate::error::{ExecutionError, StateNetError, StateNetResult};
use crate::report::{Reporter, TracingReporter};
use crate::value::Value;

pub use access::{AccessPolicy, AccessRequest, AllowAll, Operation};
pub use arena::NodeId;
pub use handle::{Assignment, Entry, Handle, Key, NodeMeta};
pub use instructions::{InstructionName, InstructionSet, Mutability, PropertyDescriptor};

use arena::Arena;
use state::GraphInner;

/// A built state graph: the root handle plus its bus.
#[derive(Debug, Clone)]
pub struct StateGraph {
    inner: Arc<GraphInner>,
    root: Handle,
}

impl StateGraph {
    /// Starts configuring a graph.
    #[must_use]
    pub fn builder() -> StateGraphBuilder {
        StateGraphBuilder::new()
    }

    /// Handle to the root node.
    #[must_use]
    pub fn root(&self) -> Handle {
        self.root.clone()
    }

    /// The graph's listener bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<ListenerBus> {
        &self.inner.bus
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> StateNetResult<usize> {
        self.inner.node_count()
    }

    /// Waits for deferred dispatches queued so far.
    pub fn flush(&self) -> StateNetResult<()> {
        self.inner.bus.flush()
    }
}

/// Builder for `StateGraph`.
///
/// # Example
/// ```rust,ignore
/// let graph = StateGraph::builder()
///     .config(GraphConfig::default())
///     .reporter(Arc::new(TracingReporter))
///     .build(seed)?;
/// ```
#[derive(Debug, Default)]
pub struct StateGraphBuilder {
    config: GraphConfig,
    bus: Option<Arc<ListenerBus>>,
    reporter: Option<Arc<dyn Reporter>>,
    access: Option<Arc<dyn AccessPolicy>>,
}

impl StateGraphBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Publishes on an existing bus instead of creating one.
    #[must_use]
    pub fn bus(mut self, bus: Arc<ListenerBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets the reporting sink. Ignored for the bus when one is supplied.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Sets the access policy (default `AllowAll`).
    #[must_use]
    pub fn access_policy(mut self, access: Arc<dyn AccessPolicy>) -> Self {
        self.access = Some(access);
        self
    }

    /// Builds the graph from a seed container.
    ///
    /// # Errors
    /// - Invalid configuration, keys, or instructions (nothing is built)
    /// - A scalar seed (`NotAContainer`)
    pub fn build(self, seed: Value) -> StateNetResult<StateGraph> {
        let config = self.config.validate()?;
        if !seed.is_node_kind() {
            return Err(StateNetError::Execution(ExecutionError::NotAContainer {
                namespace: config.namespace,
            }));
        }

        let draft = build::draft(seed, &InstructionSet::default(), Some(&config.instructions))?;
        let mut arena = Arena::default();
        let root = build::insert(&mut arena, draft);

        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(TracingReporter) as Arc<dyn Reporter>);
        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(ListenerBus::with_reporter(config.bus.clone(), Arc::clone(&reporter))));
        let access = self
            .access
            .unwrap_or_else(|| Arc::new(AllowAll) as Arc<dyn AccessPolicy>);

        let inner = Arc::new(GraphInner::new(arena, root, &config.namespace, bus, reporter, access));
        tracing::debug!(
            namespace = %config.namespace,
            nodes = inner.node_count().unwrap_or(0),
            "state graph built"
        );

        let root = Handle::new(Arc::clone(&inner), inner.root, config.namespace);
        Ok(StateGraph { inner, root })
    }
}

/// Builds a graph from a seed and returns its root handle.
pub fn build_graph(seed: Value, config: GraphConfig) -> StateNetResult<Handle> {
    Ok(StateGraph::builder().config(config).build(seed)?.root())
}
