//! Listener bus: registration, lookup, and dispatch.
//!
//! Registrations live in a trie keyed by namespace segment, plus a reverse index
//! from handler id to owning namespace. Dispatch snapshots the matching handlers
//! under a read lock and invokes them after the lock is released, so handlers may
//! subscribe, unsubscribe or dispatch again without deadlocking.
//!
//! Deferred dispatch units go through a bounded channel to a dedicated worker
//! thread. Callers block while the queue is full. Code already running on the
//! worker (including the scoped threads of a concurrent unit) cannot wait on
//! itself, so its enqueues use `try_send` and a full queue drops the unit and
//! counts it.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, StateNetError, StateNetResult, ValidationError};
use crate::namespace;
use crate::report::{Reporter, TracingReporter};

use super::event::EventPayload;
use super::handler::{Action, ActionFilter, Handler, HandlerId, HandlerRecord};
use super::trie::{HandlerEntry, ListenerNode};

const WORKER_NAME: &str = "statenet-dispatch";

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the dispatch worker whose handlers this thread is running; 0 when none.
    static ACTIVE_WORKER: Cell<u64> = const { Cell::new(0) };
}

fn active_worker() -> u64 {
    ACTIVE_WORKER.with(Cell::get)
}

/// Listener bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct BusConfig {
    /// Deferred dispatch units the queue holds. Callers block while it is
    /// full; re-entrant enqueues from the worker are dropped instead.
    pub async_queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            async_queue_capacity: 4096,
        }
    }
}

/// How the handlers of one dispatch are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Run every handler before returning.
    #[default]
    Sync,
    /// Queue the unit for the dispatch worker.
    Async,
    /// Queue the unit; the worker runs its handlers in parallel.
    Concurrent,
}

#[derive(Debug)]
struct DispatchUnit {
    namespace: String,
    action: Action,
    payload: EventPayload,
    handlers: Vec<HandlerEntry>,
    concurrent: bool,
}

#[derive(Debug)]
enum Job {
    Dispatch(DispatchUnit),
    Flush { reply: Sender<()> },
}

#[derive(Debug)]
struct DispatchWorker {
    id: u64,
    tx: Sender<Job>,
    join: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct BusState {
    root: ListenerNode,
    index: HashMap<HandlerId, String>,
}

/// A hierarchical publish/subscribe registry keyed by dotted namespaces.
#[derive(Debug)]
pub struct ListenerBus {
    cfg: BusConfig,
    state: RwLock<BusState>,
    reporter: Arc<dyn Reporter>,
    worker: Mutex<Option<DispatchWorker>>,
    dropped_dispatches: AtomicU64,
}

impl Default for ListenerBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl ListenerBus {
    /// Creates a bus that reports through `tracing`.
    #[must_use]
    pub fn new(cfg: BusConfig) -> Self {
        Self::with_reporter(cfg, Arc::new(TracingReporter))
    }

    /// Creates a bus with a custom reporting sink.
    #[must_use]
    pub fn with_reporter(cfg: BusConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            cfg,
            state: RwLock::new(BusState::default()),
            reporter,
            worker: Mutex::new(None),
            dropped_dispatches: AtomicU64::new(0),
        }
    }

    /// The reporting sink shared with the graph.
    #[must_use]
    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    /// Registers `handler` at one namespace.
    pub fn subscribe(
        &self,
        namespace: &str,
        handler: Handler,
        actions: impl Into<ActionFilter>,
    ) -> StateNetResult<Vec<HandlerId>> {
        self.subscribe_all(&[namespace], &[handler], actions)
    }

    /// Registers every handler at every namespace.
    ///
    /// Returned ids are in namespace-major order. All namespaces are validated
    /// before anything is registered.
    pub fn subscribe_all<S: AsRef<str>>(
        &self,
        namespaces: &[S],
        handlers: &[Handler],
        actions: impl Into<ActionFilter>,
    ) -> StateNetResult<Vec<HandlerId>> {
        if handlers.is_empty() {
            return Err(StateNetError::Validation(ValidationError::InvalidHandler {
                reason: "at least one handler is required".to_string(),
            }));
        }
        if namespaces.is_empty() {
            return Err(StateNetError::invalid_namespace("", "at least one namespace is required"));
        }

        let parsed = namespaces
            .iter()
            .map(|ns| namespace::parse(ns.as_ref()))
            .collect::<StateNetResult<Vec<_>>>()?;
        let actions = actions.into();

        let mut state = self.write_state()?;
        let mut ids = Vec::with_capacity(parsed.len() * handlers.len());
        for (raw, ns) in namespaces.iter().zip(&parsed) {
            for handler in handlers {
                let entry = HandlerEntry {
                    id: HandlerId::new(),
                    record: HandlerRecord {
                        handler: handler.clone(),
                        actions: actions.clone(),
                    },
                };
                let id = entry.id;
                match &ns.wildcard {
                    Some(suffix) => state.root.insert_wildcard(&ns.base, suffix, entry)?,
                    None => state.root.insert_direct(&ns.base, entry),
                }
                state.index.insert(id, raw.as_ref().to_string());
                tracing::debug!(handler_id = %id, namespace = raw.as_ref(), "handler registered");
                ids.push(id);
            }
        }

        Ok(ids)
    }

    /// Removes handlers by id. Unknown ids are skipped.
    pub fn unsubscribe(&self, ids: &[HandlerId]) -> StateNetResult<HashMap<HandlerId, HandlerRecord>> {
        self.remove_where(ids, |_| true)
    }

    /// Removes handlers by textual id. Every id is validated before anything is removed.
    pub fn unsubscribe_raw<S: AsRef<str>>(&self, ids: &[S]) -> StateNetResult<HashMap<HandlerId, HandlerRecord>> {
        let parsed = ids
            .iter()
            .map(|id| id.as_ref().parse::<HandlerId>())
            .collect::<StateNetResult<Vec<_>>>()?;
        self.unsubscribe(&parsed)
    }

    /// Removes only the handlers whose owning namespace is at or below `scope`.
    pub fn unsubscribe_within(
        &self,
        scope: &str,
        ids: &[HandlerId],
    ) -> StateNetResult<HashMap<HandlerId, HandlerRecord>> {
        self.remove_where(ids, |owner| namespace::is_within(owner, scope))
    }

    fn remove_where(
        &self,
        ids: &[HandlerId],
        keep_scope: impl Fn(&str) -> bool,
    ) -> StateNetResult<HashMap<HandlerId, HandlerRecord>> {
        let mut state = self.write_state()?;
        let mut removed = HashMap::new();

        for id in ids {
            let Some(owner) = state.index.get(id).cloned() else {
                continue;
            };
            if !keep_scope(&owner) {
                continue;
            }

            let parsed = namespace::parse(&owner)?;
            let record = match &parsed.wildcard {
                Some(suffix) => state.root.remove_wildcard(&parsed.base, suffix, *id),
                None => state.root.remove_direct(&parsed.base, *id),
            };
            state.index.remove(id);

            if let Some(record) = record {
                tracing::debug!(handler_id = %id, namespace = %owner, "handler removed");
                removed.insert(*id, record);
            }
        }

        Ok(removed)
    }

    /// Whether dispatching to `namespace` would reach any handler.
    ///
    /// For a wildcard namespace, whether that exact suffix has handlers at its base.
    pub fn has_subscriber(&self, namespace: &str) -> StateNetResult<bool> {
        let parsed = namespace::parse(namespace)?;
        let state = self.read_state()?;

        if let Some(suffix) = &parsed.wildcard {
            return Ok(state
                .root
                .entry(&parsed.base)
                .is_some_and(|node| node.has_wildcard(suffix)));
        }

        if state.root.entry(&parsed.segments).is_some_and(ListenerNode::has_direct) {
            return Ok(true);
        }
        Ok(state.root.wildcard_matches(&parsed.segments, namespace))
    }

    /// Dispatches synchronously.
    pub fn dispatch(&self, namespace: &str, action: Action, payload: EventPayload) -> StateNetResult<()> {
        self.dispatch_with(namespace, action, payload, DispatchMode::Sync)
    }

    /// Dispatches with an explicit mode.
    pub fn dispatch_with(
        &self,
        namespace: &str,
        action: Action,
        payload: EventPayload,
        mode: DispatchMode,
    ) -> StateNetResult<()> {
        let parsed = namespace::parse(namespace)?;
        if parsed.is_wildcard() {
            return Err(StateNetError::invalid_namespace(
                namespace,
                "dispatch requires a literal namespace",
            ));
        }

        let handlers: Vec<HandlerEntry> = {
            let state = self.read_state()?;
            state
                .root
                .collect(&parsed.segments, namespace)
                .into_iter()
                .filter(|e| e.record.accepts(action))
                .collect()
        };
        if handlers.is_empty() {
            return Ok(());
        }

        let unit = DispatchUnit {
            namespace: namespace.to_string(),
            action,
            payload,
            handlers,
            concurrent: mode == DispatchMode::Concurrent,
        };

        match mode {
            DispatchMode::Sync => {
                run_unit(&unit, self.reporter.as_ref());
                Ok(())
            }
            DispatchMode::Async | DispatchMode::Concurrent => self.enqueue(unit),
        }
    }

    fn enqueue(&self, unit: DispatchUnit) -> StateNetResult<()> {
        let (worker, tx) = self.worker_sender()?;
        let rejected = if active_worker() == worker {
            match tx.try_send(Job::Dispatch(unit)) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(job) | TrySendError::Disconnected(job)) => job,
            }
        } else {
            match tx.send(Job::Dispatch(unit)) {
                Ok(()) => return Ok(()),
                Err(err) => err.into_inner(),
            }
        };

        self.dropped_dispatches.fetch_add(1, Ordering::Relaxed);
        let namespace = match rejected {
            Job::Dispatch(unit) => unit.namespace,
            Job::Flush { .. } => String::new(),
        };
        tracing::warn!(namespace = %namespace, "deferred dispatch dropped");
        self.reporter.error(&StateNetError::Execution(ExecutionError::Disconnected {
            path: format!("dispatch queue ({namespace})"),
        }));
        Ok(())
    }

    /// Blocks until every deferred dispatch queued before this call has run.
    ///
    /// Returns immediately when called from a handler running on the worker,
    /// including handlers of a concurrent unit.
    pub fn flush(&self) -> StateNetResult<()> {
        let tx = {
            let guard = self.lock_worker()?;
            match guard.as_ref() {
                None => return Ok(()),
                Some(w) if w.id == active_worker() => return Ok(()),
                Some(w) => w.tx.clone(),
            }
        };

        let disconnected = || {
            StateNetError::Execution(ExecutionError::Disconnected {
                path: "dispatch_worker".to_string(),
            })
        };
        let (reply_tx, reply_rx) = bounded::<()>(1);
        tx.send(Job::Flush { reply: reply_tx }).map_err(|_| disconnected())?;
        reply_rx.recv().map_err(|_| disconnected())
    }

    /// Removes every registration at or below `namespace` and prunes the trie there.
    pub fn purge(&self, namespace: &str) -> StateNetResult<HashMap<HandlerId, HandlerRecord>> {
        let parsed = namespace::parse(namespace)?;
        if parsed.is_wildcard() {
            return Err(StateNetError::invalid_namespace(
                namespace,
                "purge requires a literal namespace",
            ));
        }

        let mut state = self.write_state()?;
        let mut drained = Vec::new();
        if let Some(subtree) = state.root.take_subtree(&parsed.segments) {
            subtree.drain_into(&mut drained);
        }

        let mut removed = HashMap::with_capacity(drained.len());
        for entry in drained {
            state.index.remove(&entry.id);
            removed.insert(entry.id, entry.record);
        }
        tracing::debug!(namespace, removed = removed.len(), "bus branch purged");
        Ok(removed)
    }

    /// Number of live registrations.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.state.read().map(|s| s.index.len()).unwrap_or(0)
    }

    /// Number of deferred dispatch units dropped: re-entrant enqueues that met a
    /// full queue, or any enqueue after the worker stopped.
    #[must_use]
    pub fn dropped_dispatches(&self) -> u64 {
        self.dropped_dispatches.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn poison_state(&self) {
        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = self.state.write();
            panic!("listener bus poisoned on purpose");
        }));
    }

    fn read_state(&self) -> StateNetResult<RwLockReadGuard<'_, BusState>> {
        self.state
            .read()
            .map_err(|_| StateNetError::internal("listener bus lock poisoned"))
    }

    fn write_state(&self) -> StateNetResult<RwLockWriteGuard<'_, BusState>> {
        self.state
            .write()
            .map_err(|_| StateNetError::internal("listener bus lock poisoned"))
    }

    fn lock_worker(&self) -> StateNetResult<std::sync::MutexGuard<'_, Option<DispatchWorker>>> {
        self.worker
            .lock()
            .map_err(|_| StateNetError::internal("dispatch worker lock poisoned"))
    }

    fn worker_sender(&self) -> StateNetResult<(u64, Sender<Job>)> {
        let mut guard = self.lock_worker()?;
        if let Some(worker) = guard.as_ref() {
            return Ok((worker.id, worker.tx.clone()));
        }

        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded::<Job>(self.cfg.async_queue_capacity.max(1));
        let reporter = Arc::clone(&self.reporter);
        let join = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || worker_loop(id, &rx, reporter.as_ref()))
            .map_err(|e| StateNetError::internal(format!("failed to spawn dispatch worker: {e}")))?;

        *guard = Some(DispatchWorker {
            id,
            tx: tx.clone(),
            join: Some(join),
        });
        Ok((id, tx))
    }
}

impl Drop for ListenerBus {
    fn drop(&mut self) {
        let worker = match self.worker.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(DispatchWorker { id, tx, join }) = worker else {
            return;
        };

        // Close the queue first so the worker drains and exits.
        drop(tx);
        if let Some(handle) = join {
            if id != active_worker() {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(id: u64, rx: &Receiver<Job>, reporter: &dyn Reporter) {
    ACTIVE_WORKER.with(|w| w.set(id));
    while let Ok(job) = rx.recv() {
        match job {
            Job::Dispatch(unit) => run_unit(&unit, reporter),
            Job::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

fn run_unit(unit: &DispatchUnit, reporter: &dyn Reporter) {
    if unit.concurrent && unit.handlers.len() > 1 {
        let worker = active_worker();
        thread::scope(|scope| {
            for entry in &unit.handlers {
                scope.spawn(move || {
                    ACTIVE_WORKER.with(|w| w.set(worker));
                    invoke_isolated(entry, unit, reporter);
                });
            }
        });
        return;
    }

    for entry in &unit.handlers {
        invoke_isolated(entry, unit, reporter);
    }
}

fn invoke_isolated(entry: &HandlerEntry, unit: &DispatchUnit, reporter: &dyn Reporter) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        entry.record.handler.call(&unit.payload, &unit.namespace, unit.action);
    }));

    if let Err(panic) = outcome {
        let err = StateNetError::Execution(ExecutionError::HandlerPanicked {
            namespace: unit.namespace.clone(),
            message: panic_message(panic.as_ref()),
        });
        tracing::debug!(handler_id = %entry.id, namespace = %unit.namespace, "handler panicked");
        reporter.error(&err);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    use super::*;
    use crate::report::testing::CollectingReporter;
    use crate::value::Value;

    fn remote(v: i64) -> EventPayload {
        EventPayload::Remote { data: Value::Int(v) }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Handler {
        let counter = Arc::clone(counter);
        Handler::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn recording(seen: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Handler {
        let seen = Arc::clone(seen);
        Handler::new(move |_, ns, _| {
            seen.lock().unwrap().push(format!("{tag}:{ns}"));
        })
    }

    #[test]
    fn subscribe_then_unsubscribe_round_trips() {
        let bus = ListenerBus::default();
        let hits = Arc::new(AtomicUsize::new(0));

        for ns in ["a.b.c", "a.b.$every", "a.$all", "$every"] {
            assert!(!bus.has_subscriber(ns).unwrap());
            let ids = bus.subscribe(ns, counting(&hits), ActionFilter::All).unwrap();
            assert!(bus.has_subscriber(ns).unwrap(), "{ns}");
            let removed = bus.unsubscribe(&ids).unwrap();
            assert_eq!(removed.len(), 1);
            assert!(!bus.has_subscriber(ns).unwrap(), "{ns}");
        }
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn dispatch_reaches_exact_and_wildcard_handlers_only() {
        let bus = ListenerBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for (ns, tag) in [
            ("a.b.c", "exact"),
            ("a.b.$every", "every_tail"),
            ("a.$every.c", "every_mid"),
            ("a.$all", "all_a"),
            ("a.b.$all", "all_ab"),
            ("a.b.c.d", "deeper"),
            ("x.b.c", "unrelated"),
            ("a.b.c.$every", "below"),
        ] {
            bus.subscribe(ns, recording(&seen, tag), ActionFilter::All).unwrap();
        }

        bus.dispatch("a.b.c", Action::Set, remote(1)).unwrap();
        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "exact:a.b.c",
                "every_mid:a.b.c",
                "all_a:a.b.c",
                "every_tail:a.b.c",
                "all_ab:a.b.c",
            ]
        );
    }

    #[test]
    fn every_handler_sees_concrete_namespaces() {
        let bus = ListenerBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("list.$every", recording(&seen, "h"), ActionFilter::All)
            .unwrap();

        bus.dispatch("list.first", Action::Set, remote(1)).unwrap();
        bus.dispatch("list.second", Action::Set, remote(2)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["h:list.first", "h:list.second"]);
    }

    #[test]
    fn action_filter_is_honored() {
        let bus = ListenerBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("a", counting(&hits), Action::Set).unwrap();

        bus.dispatch("a", Action::Get, remote(1)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.dispatch("a", Action::Set, remote(1)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let reporter = Arc::new(CollectingReporter::default());
        let bus = ListenerBus::with_reporter(BusConfig::default(), reporter.clone());
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe("a", Handler::new(|_, _, _| panic!("boom")), ActionFilter::All)
            .unwrap();
        bus.subscribe("a", counting(&hits), ActionFilter::All).unwrap();

        bus.dispatch("a", Action::Set, remote(1)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let errors = reporter.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("boom"));
    }

    #[test]
    fn subscribe_validates_before_registering() {
        let bus = ListenerBus::default();
        let err = bus
            .subscribe_all(&["ok.ns", "bad..ns"], &[Handler::new(|_, _, _| {})], ActionFilter::All)
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(bus.handler_count(), 0);

        let err = bus.subscribe_all(&["ok"], &[], ActionFilter::All).unwrap_err();
        assert!(matches!(
            err,
            StateNetError::Validation(ValidationError::InvalidHandler { .. })
        ));
    }

    #[test]
    fn list_subscription_yields_independent_ids() {
        let bus = ListenerBus::default();
        let ids = bus
            .subscribe_all(&["x.a", "x.b"], &[Handler::new(|_, _, _| {})], ActionFilter::All)
            .unwrap();
        assert_eq!(ids.len(), 2);

        bus.unsubscribe(&ids[..1]).unwrap();
        assert!(!bus.has_subscriber("x.a").unwrap());
        assert!(bus.has_subscriber("x.b").unwrap());
    }

    #[test]
    fn unsubscribe_raw_rejects_malformed_ids_up_front() {
        let bus = ListenerBus::default();
        let ids = bus
            .subscribe("a", Handler::new(|_, _, _| {}), ActionFilter::All)
            .unwrap();
        let raw = ids[0].to_string();

        let err = bus.unsubscribe_raw(&[raw.as_str(), "nope"]).unwrap_err();
        assert!(matches!(
            err,
            StateNetError::Validation(ValidationError::InvalidListenerId { .. })
        ));
        assert_eq!(bus.handler_count(), 1);

        assert_eq!(bus.unsubscribe_raw(&[raw]).unwrap().len(), 1);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn unsubscribe_within_respects_scope() {
        let bus = ListenerBus::default();
        let h = Handler::new(|_, _, _| {});
        let inside = bus.subscribe("a.b.c", h.clone(), ActionFilter::All).unwrap();
        let outside = bus.subscribe("a.bc", h, ActionFilter::All).unwrap();

        let all: Vec<HandlerId> = inside.iter().chain(&outside).copied().collect();
        let removed = bus.unsubscribe_within("a.b", &all).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(removed.contains_key(&inside[0]));
        assert!(bus.has_subscriber("a.bc").unwrap());
    }

    #[test]
    fn purge_removes_branch_registrations() {
        let bus = ListenerBus::default();
        let h = Handler::new(|_, _, _| {});
        for ns in ["a.b", "a.b.c", "a.b.$every", "a.bc", "a.$all"] {
            bus.subscribe(ns, h.clone(), ActionFilter::All).unwrap();
        }

        let removed = bus.purge("a.b").unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(bus.handler_count(), 2);
        assert!(!bus.has_subscriber("a.b.$every").unwrap());
        assert!(bus.has_subscriber("a.bc").unwrap());
        assert!(bus.has_subscriber("a.$all").unwrap());
    }

    #[test]
    fn handlers_may_unsubscribe_during_dispatch() {
        let bus = Arc::new(ListenerBus::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let ids: Arc<Mutex<Vec<HandlerId>>> = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&bus);
        let ids_in = Arc::clone(&ids);
        let hits_in = Arc::clone(&hits);
        let self_removing = Handler::new(move |_, _, _| {
            hits_in.fetch_add(1, Ordering::SeqCst);
            if let Some(bus) = weak.upgrade() {
                let ids = ids_in.lock().unwrap().clone();
                bus.unsubscribe(&ids).unwrap();
            }
        });

        *ids.lock().unwrap() = bus.subscribe("a", self_removing, ActionFilter::All).unwrap();
        bus.dispatch("a", Action::Set, remote(1)).unwrap();
        bus.dispatch("a", Action::Set, remote(2)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn async_dispatch_runs_after_flush() {
        let bus = ListenerBus::default();
        let gate = Arc::new(Barrier::new(2));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let gate_in = Arc::clone(&gate);
        bus.subscribe(
            "gate",
            Handler::new(move |_, _, _| {
                gate_in.wait();
            }),
            ActionFilter::All,
        )
        .unwrap();
        bus.subscribe("a", recording(&seen, "first"), ActionFilter::All).unwrap();
        bus.subscribe("a", recording(&seen, "second"), ActionFilter::All).unwrap();

        bus.dispatch_with("gate", Action::Set, remote(0), DispatchMode::Async)
            .unwrap();
        bus.dispatch_with("a", Action::Set, remote(1), DispatchMode::Async)
            .unwrap();

        // Worker is parked on the barrier.
        assert!(seen.lock().unwrap().is_empty());
        gate.wait();
        bus.flush().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first:a", "second:a"]);
    }

    #[test]
    fn concurrent_dispatch_runs_every_handler() {
        let bus = ListenerBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            bus.subscribe("a", counting(&hits), ActionFilter::All).unwrap();
        }
        bus.dispatch_with("a", Action::Set, remote(1), DispatchMode::Concurrent)
            .unwrap();
        bus.flush().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn full_queue_blocks_callers_instead_of_dropping() {
        let bus = Arc::new(ListenerBus::new(BusConfig {
            async_queue_capacity: 1,
        }));
        let hits = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Barrier::new(2));
        let gate_in = Arc::clone(&gate);
        let hits_in = Arc::clone(&hits);
        bus.subscribe(
            "gate",
            Handler::new(move |_, _, _| {
                gate_in.wait();
                hits_in.fetch_add(1, Ordering::SeqCst);
            }),
            ActionFilter::All,
        )
        .unwrap();

        let producer = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || {
                for i in 0..3 {
                    bus.dispatch_with("gate", Action::Set, remote(i), DispatchMode::Async)
                        .unwrap();
                }
            })
        };
        for _ in 0..3 {
            gate.wait();
        }
        producer.join().unwrap();
        bus.flush().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(bus.dropped_dispatches(), 0);
    }

    #[test]
    fn reentrant_enqueue_on_full_queue_is_dropped_and_reported() {
        let reporter = Arc::new(CollectingReporter::default());
        let bus = Arc::new(ListenerBus::with_reporter(
            BusConfig {
                async_queue_capacity: 1,
            },
            reporter.clone(),
        ));
        let inner_hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("inner", counting(&inner_hits), ActionFilter::All)
            .unwrap();

        let weak = Arc::downgrade(&bus);
        let (done_tx, done_rx) = bounded::<()>(1);
        bus.subscribe(
            "outer",
            Handler::new(move |_, _, _| {
                if let Some(bus) = weak.upgrade() {
                    // The worker is busy here, so the queue takes one unit.
                    for i in 0..2 {
                        bus.dispatch_with("inner", Action::Set, remote(i), DispatchMode::Async)
                            .unwrap();
                    }
                }
                let _ = done_tx.send(());
            }),
            ActionFilter::All,
        )
        .unwrap();

        bus.dispatch_with("outer", Action::Set, remote(0), DispatchMode::Async)
            .unwrap();
        done_rx.recv().unwrap();
        bus.flush().unwrap();

        assert_eq!(inner_hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.dropped_dispatches(), 1);
        assert_eq!(reporter.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn flush_from_a_concurrent_handler_returns() {
        let bus = Arc::new(ListenerBus::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let weak = Arc::downgrade(&bus);
        let flushed = Arc::new(AtomicUsize::new(0));
        let flushed_in = Arc::clone(&flushed);
        bus.subscribe(
            "a",
            Handler::new(move |_, _, _| {
                if weak.upgrade().is_some_and(|bus| bus.flush().is_ok()) {
                    flushed_in.fetch_add(1, Ordering::SeqCst);
                }
            }),
            ActionFilter::All,
        )
        .unwrap();
        bus.subscribe("a", counting(&hits), ActionFilter::All).unwrap();

        bus.dispatch_with("a", Action::Set, remote(1), DispatchMode::Concurrent)
            .unwrap();
        bus.flush().unwrap();

        assert_eq!(flushed.load(Ordering::SeqCst), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_rejects_wildcard_namespaces() {
        let bus = ListenerBus::default();
        let err = bus.dispatch("a.$all", Action::Set, remote(1)).unwrap_err();
        assert!(err.is_validation());
    }
}
