//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns the node arena, the owner tree, the tracking stack and
//! the scheduler of one reactive universe.
//!
//! # How It Works
//!
//! 1. Reading a node inside a running computation records an edge from the
//!    node to that computation.
//!
//! 2. Writing a signal marks its observers `Stale` and everything beyond
//!    them `Check`, queueing the effects it reaches.
//!
//! 3. Unless a batch or flush is already in progress, the write then
//!    flushes: every queued effect is resolved, which first resolves its
//!    memo sources (recursively) and re-runs the effect only if one of them
//!    actually changed. Memos are lazy; nothing re-runs them except a read.
//!
//! 4. Writes made by effects during a flush are absorbed into it as another
//!    wave of the queue. The number of waves is capped by
//!    [`RuntimeConfig::max_flush_iterations`].
//!
//! # Isolation
//!
//! A `Runtime` is a cheap handle (`Rc`) to one universe. There is no global
//! instance: independent runtimes, e.g. one per server request, never share
//! nodes or tracking state. Runtimes are `!Send`; all reactive work happens
//! synchronously on the thread that owns the runtime.
//!
//! Node handles hold only a weak reference to their runtime. A computation
//! body that needs the runtime itself should capture a [`WeakRuntime`]; a
//! captured `Runtime` clone keeps the universe alive until
//! [`Runtime::dispose`] releases it.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use serde::Deserialize;
use tracing::{debug, trace, warn};

use super::context::{Frame, ReactiveContext, Tracker};
use super::effect::{Effect, EffectBody};
use super::memo::{Memo, MemoBody};
use super::owner::{OwnerId, OwnerTree, Root, Teardown};
use super::signal::Signal;
use super::trigger::Trigger;
use crate::error::{raise, BoxError, ReactiveError};
use crate::graph::{Computation, NodeBody, NodeId, NodeKind, NodeState, NodeStore, Scheduler};

/// Default cap on flush waves before a flush is declared runaway.
pub const DEFAULT_MAX_FLUSH_ITERATIONS: usize = 1_000;

/// Runtime configuration.
///
/// Deserializable so embedders can load it alongside their own settings;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of effect waves one flush may run. A wave is the set
    /// of effects queued when the previous wave finished; re-entrant writes
    /// that keep queueing effects past this limit fail with
    /// [`ReactiveError::RunawayFlush`]. Values below 1 are treated as 1.
    pub max_flush_iterations: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_iterations: DEFAULT_MAX_FLUSH_ITERATIONS,
        }
    }
}

/// Handle to one reactive universe.
///
/// # Example
///
/// ```rust
/// use filament_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_signal(1);
///
/// let c = count.clone();
/// let doubled = rt.create_memo(move || c.get() * 2);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    store: RefCell<NodeStore>,
    owners: RefCell<OwnerTree>,
    tracker: RefCell<Tracker>,
    scheduler: RefCell<Scheduler>,
    /// Implicit owner for nodes created outside any root.
    root: OwnerId,
}

/// Upgrade a handle's runtime reference.
pub(crate) fn upgrade(
    runtime: &Weak<RuntimeInner>,
    node: NodeId,
) -> Result<Rc<RuntimeInner>, ReactiveError> {
    runtime
        .upgrade()
        .ok_or(ReactiveError::DisposedNodeAccess { node })
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(config)),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    fn weak(&self) -> Weak<RuntimeInner> {
        Rc::downgrade(&self.inner)
    }

    /// A handle that does not keep the universe alive, for capture in
    /// computation bodies.
    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime { inner: self.weak() }
    }

    /// Create a signal compared with `PartialEq`.
    pub fn create_signal<T: PartialEq + 'static>(&self, value: T) -> Signal<T> {
        self.create_signal_with(value, |a: &T, b: &T| a == b)
    }

    /// Create a signal with a custom equality function. Writes of a value
    /// equal to the current one are ignored.
    pub fn create_signal_with<T, E>(&self, value: T, equals: E) -> Signal<T>
    where
        T: 'static,
        E: Fn(&T, &T) -> bool + 'static,
    {
        let id = self
            .inner
            .create_node(NodeBody::Source, Some(Rc::new(value) as Rc<dyn Any>));
        Signal::new(self.weak(), id, Rc::new(equals))
    }

    /// Create a memo compared with `PartialEq`.
    ///
    /// The function is not run until the memo is first read.
    pub fn create_memo<T, F>(&self, compute: F) -> Memo<T>
    where
        T: PartialEq + 'static,
        F: Fn() -> T + 'static,
    {
        self.create_memo_with(compute, |a: &T, b: &T| a == b)
    }

    /// Create a memo with a custom equality function. A recomputation that
    /// yields an equal value does not invalidate the memo's observers.
    pub fn create_memo_with<T, F, E>(&self, compute: F, equals: E) -> Memo<T>
    where
        T: 'static,
        F: Fn() -> T + 'static,
        E: Fn(&T, &T) -> bool + 'static,
    {
        let body: Rc<dyn Computation> = Rc::new(MemoBody::new(compute, equals));
        let id = self.inner.create_node(NodeBody::Memo(body), None);
        Memo::new(self.weak(), id)
    }

    /// Create an effect and run it.
    ///
    /// The first run happens before this returns, unless a batch or flush
    /// is in progress, in which case it joins that flush.
    ///
    /// # Panics
    ///
    /// Panics with a [`ReactiveError`] payload if the triggered flush fails
    /// and no owner handles the error.
    pub fn create_effect<F>(&self, mut run: F) -> Effect
    where
        F: FnMut() + 'static,
    {
        self.create_fallible_effect(move || {
            run();
            Ok::<(), BoxError>(())
        })
    }

    /// Create an effect whose body may fail.
    ///
    /// An `Err` is reported like a panic in the body: to the nearest
    /// [`on_error`](Self::on_error) handler, or to the caller that
    /// triggered the flush.
    pub fn create_fallible_effect<F, E>(&self, mut run: F) -> Effect
    where
        F: FnMut() -> Result<(), E> + 'static,
        E: Into<BoxError>,
    {
        let body: Rc<dyn Computation> = Rc::new(EffectBody::new(move || -> Result<(), BoxError> {
            run().map_err(Into::into)
        }));
        let id = self.inner.create_node(NodeBody::Effect(body), None);
        self.inner.scheduler.borrow_mut().enqueue(id);

        if let Err(err) = self.inner.flush() {
            raise(err);
        }
        Effect::new(self.weak(), id)
    }

    /// Create a value-less source.
    pub fn create_trigger(&self) -> Trigger {
        let id = self.inner.create_node(NodeBody::Source, None);
        Trigger::new(self.weak(), id)
    }

    /// Run `callback(new, previous)` whenever `source()` yields a value
    /// different from the last one, starting with `previous == None`.
    ///
    /// Only `source` is tracked; reads inside `callback` are not.
    pub fn watch<T, S, C>(&self, source: S, callback: C) -> Effect
    where
        T: PartialEq + 'static,
        S: Fn() -> T + 'static,
        C: Fn(&T, Option<&T>) + 'static,
    {
        let runtime = self.weak();
        let mut previous: Option<T> = None;

        self.create_effect(move || {
            let next = source();
            if previous.as_ref() == Some(&next) {
                return;
            }
            match runtime.upgrade() {
                Some(rt) => rt.untracked(|| callback(&next, previous.as_ref())),
                None => callback(&next, previous.as_ref()),
            }
            previous = Some(next);
        })
    }

    /// Run `f` with writes coalesced into a single flush at the outermost
    /// batch boundary.
    ///
    /// # Panics
    ///
    /// Panics with a [`ReactiveError`] payload if the closing flush fails.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.try_batch(f) {
            Ok(result) => result,
            Err(err) => raise(err),
        }
    }

    /// Like [`batch`](Self::batch), returning the flush error instead.
    pub fn try_batch<R>(&self, f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
        let result = {
            let _batch = BatchGuard::enter(&self.inner.scheduler);
            f()
        };
        self.inner.flush()?;
        Ok(result)
    }

    /// Whether a batch is open.
    pub fn is_batching(&self) -> bool {
        self.inner.scheduler.borrow().is_batching()
    }

    /// Run `f` without recording dependencies for the current computation.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.untracked(f)
    }

    /// Run `f` under a new top-level owner.
    ///
    /// Reads inside `f` are untracked. Everything created inside is
    /// released by [`Root::dispose`].
    pub fn create_root<R>(&self, f: impl FnOnce(&Root) -> R) -> R {
        let owner = self.inner.owners.borrow_mut().create(None);
        trace!(%owner, "created root");

        let root = Root::new(self.weak(), owner);
        let _ctx = ReactiveContext::enter(&self.inner.tracker, Frame::untracked(owner));
        f(&root)
    }

    /// Register `f` to run when the current owner is disposed, or before the
    /// current computation re-runs. Cleanups run in reverse registration
    /// order.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) {
        let owner = self.inner.current_owner();
        let rejected = self
            .inner
            .owners
            .borrow_mut()
            .add_cleanup(owner, Box::new(f))
            .err();

        // Owner already gone: nothing will ever run it later
        if let Some(cleanup) = rejected {
            cleanup();
        }
    }

    /// Handle errors of effects created under the current owner.
    ///
    /// The nearest handler above a failing effect receives the error and
    /// the flush carries on as if it had succeeded.
    pub fn on_error(&self, handler: impl Fn(&ReactiveError) + 'static) {
        let owner = self.inner.current_owner();
        self.inner
            .owners
            .borrow_mut()
            .set_error_handler(owner, Rc::new(handler));
    }

    /// Attach a value of type `T` to the current owner.
    pub fn provide_context<T: 'static>(&self, value: T) {
        let owner = self.inner.current_owner();
        self.inner
            .owners
            .borrow_mut()
            .provide(owner, TypeId::of::<T>(), Rc::new(value));
    }

    /// Nearest value of type `T` provided at or above the current owner.
    pub fn use_context<T: Clone + 'static>(&self) -> Option<T> {
        let owner = self.inner.current_owner();
        let value = self.inner.owners.borrow().lookup(owner, TypeId::of::<T>())?;
        value.downcast_ref::<T>().cloned()
    }

    /// Dispose every owner and the nodes they hold.
    ///
    /// The runtime stays usable; nodes created afterwards start from an
    /// empty graph.
    pub fn dispose(&self) {
        let roots = self.inner.owners.borrow().roots();
        debug!(roots = roots.len(), "disposing runtime");

        for owner in roots {
            if owner == self.inner.root {
                continue;
            }
            self.inner.dispose_owner(owner);
        }
        let teardown = self.inner.owners.borrow_mut().reset(self.inner.root);
        self.inner.release(teardown);
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.inner.store.borrow().len()
    }

    /// Number of live owners, including the implicit universe root.
    pub fn owner_count(&self) -> usize {
        self.inner.owners.borrow().len()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("node_count", &self.node_count())
            .field("owner_count", &self.owner_count())
            .finish()
    }
}

/// Weak counterpart of [`Runtime`].
#[derive(Clone, Default)]
pub struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    /// The runtime, unless every strong handle has been dropped.
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl fmt::Debug for WeakRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRuntime")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Keeps the batch depth balanced even if the batched closure panics.
struct BatchGuard<'a> {
    scheduler: &'a RefCell<Scheduler>,
}

impl<'a> BatchGuard<'a> {
    fn enter(scheduler: &'a RefCell<Scheduler>) -> Self {
        scheduler.borrow_mut().begin_batch();
        Self { scheduler }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.scheduler.borrow_mut().end_batch() {
            trace!("outermost batch closed");
        }
    }
}

/// Clears the flushing flag when a flush ends, however it ends.
struct FlushGuard<'a> {
    scheduler: &'a RefCell<Scheduler>,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        let mut scheduler = self.scheduler.borrow_mut();
        scheduler.set_flushing(false);
        scheduler.set_resolving(None);
    }
}

impl RuntimeInner {
    fn new(config: RuntimeConfig) -> Self {
        let mut owners = OwnerTree::new();
        let root = owners.create(None);

        Self {
            config,
            store: RefCell::new(NodeStore::new()),
            owners: RefCell::new(owners),
            tracker: RefCell::new(Tracker::new()),
            scheduler: RefCell::new(Scheduler::new()),
            root,
        }
    }

    /// Owner for nodes created right now.
    pub(crate) fn current_owner(&self) -> OwnerId {
        let owner = self.tracker.borrow().current_owner().unwrap_or(self.root);
        if self.owners.borrow().contains(owner) {
            owner
        } else {
            // Created by a body whose scope was disposed while it ran
            self.root
        }
    }

    pub(crate) fn create_node(&self, body: NodeBody, value: Option<Rc<dyn Any>>) -> NodeId {
        let owner = self.current_owner();
        let kind = body.kind();

        let mut owners = self.owners.borrow_mut();
        let scope = (kind != NodeKind::Source).then(|| owners.create(Some(owner)));
        let id = self.store.borrow_mut().insert(body, owner, scope, value);
        owners.adopt(owner, id);

        trace!(node = %id, ?kind, %owner, "created node");
        id
    }

    pub(crate) fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let owner = self.current_owner();
        let _ctx = ReactiveContext::enter(&self.tracker, Frame::untracked(owner));
        f()
    }

    pub(crate) fn is_alive(&self, id: NodeId) -> bool {
        self.store.borrow().contains(id)
    }

    pub(crate) fn owner_alive(&self, owner: OwnerId) -> bool {
        self.owners.borrow().contains(owner)
    }

    pub(crate) fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.store.borrow().get(id).map(|node| node.kind())
    }

    pub(crate) fn state(&self, id: NodeId) -> Option<NodeState> {
        self.store.borrow().get(id).map(|node| node.state())
    }

    pub(crate) fn version(&self, id: NodeId) -> Option<u64> {
        self.store.borrow().get(id).map(|node| node.version)
    }

    pub(crate) fn run_count(&self, id: NodeId) -> Option<usize> {
        self.store.borrow().get(id).map(|node| node.runs)
    }

    pub(crate) fn observer_count(&self, id: NodeId) -> usize {
        self.store.borrow().get(id).map_or(0, |node| node.observers.len())
    }

    pub(crate) fn source_count(&self, id: NodeId) -> usize {
        self.store.borrow().get(id).map_or(0, |node| node.sources.len())
    }

    /// Record a read of `id` by the running computation, if any.
    pub(crate) fn track(&self, id: NodeId) {
        let observer = self.tracker.borrow_mut().record(id);
        if let Some(observer) = observer {
            self.store.borrow_mut().add_edge(id, observer);
        }
    }

    /// Read a source cell's value.
    pub(crate) fn read_source(
        &self,
        id: NodeId,
        tracked: bool,
    ) -> Result<Option<Rc<dyn Any>>, ReactiveError> {
        let value = self
            .store
            .borrow()
            .get(id)
            .map(|node| node.value.clone())
            .ok_or(ReactiveError::DisposedNodeAccess { node: id })?;

        if tracked {
            self.track(id);
        }
        Ok(value)
    }

    /// Read a memo, bringing it up to date first.
    pub(crate) fn read_memo(&self, id: NodeId, tracked: bool) -> Result<Rc<dyn Any>, ReactiveError> {
        if self.tracker.borrow().is_running(id) {
            return Err(self.cycle(id));
        }
        if !self.is_alive(id) {
            return Err(ReactiveError::DisposedNodeAccess { node: id });
        }

        let resolved = self.resolve(id);
        // The reader depends on the memo even when it failed, so that it
        // retries once the memo's own sources change
        if tracked {
            self.track(id);
        }
        resolved?;

        let store = self.store.borrow();
        let node = store
            .get(id)
            .ok_or(ReactiveError::DisposedNodeAccess { node: id })?;
        if let Some(err) = &node.error {
            return Err(err.clone());
        }
        node.value
            .clone()
            .ok_or(ReactiveError::DisposedNodeAccess { node: id })
    }

    /// Move a source's value out of the arena for in-place mutation.
    pub(crate) fn take_value(&self, id: NodeId) -> Result<Rc<dyn Any>, ReactiveError> {
        self.store
            .borrow_mut()
            .get_mut(id)
            .and_then(|node| node.value.take())
            .ok_or(ReactiveError::DisposedNodeAccess { node: id })
    }

    pub(crate) fn restore_value(&self, id: NodeId, value: Rc<dyn Any>) {
        if let Some(node) = self.store.borrow_mut().get_mut(id) {
            node.value = Some(value);
        }
    }

    /// Store a new value (or just bump the version, for triggers), mark
    /// downstream nodes and flush unless one is already pending.
    pub(crate) fn write(&self, id: NodeId, value: Option<Rc<dyn Any>>) -> Result<(), ReactiveError> {
        {
            let mut store = self.store.borrow_mut();
            let node = store
                .get_mut(id)
                .ok_or(ReactiveError::DisposedNodeAccess { node: id })?;
            if value.is_some() {
                node.value = value;
            }
            node.version += 1;
            let version = node.version;

            let mut scheduler = self.scheduler.borrow_mut();
            scheduler.mark_changed(&mut store, id);
            trace!(node = %id, version, pending = scheduler.pending_len(), "source written");
        }
        self.flush()
    }

    fn cycle(&self, id: NodeId) -> ReactiveError {
        let path = self.tracker.borrow().path();
        warn!(node = %id, ?path, "cyclic dependency");
        ReactiveError::CyclicDependency { node: id, path }
    }

    /// Bring `id` up to date.
    ///
    /// Memo sources are resolved first, recursively, so that by the time the
    /// body runs every value it reads has settled for this flush. A `Check`
    /// node whose sources all turn out unchanged is marked clean without
    /// running.
    pub(crate) fn resolve(&self, id: NodeId) -> Result<(), ReactiveError> {
        let sources = {
            let store = self.store.borrow();
            // Disposed while the flush was in progress
            let Some(node) = store.get(id) else {
                return Ok(());
            };
            if node.kind() == NodeKind::Source || node.state() == NodeState::Clean {
                return Ok(());
            }
            node.sources.clone()
        };

        for source in sources {
            if self.kind(source) == Some(NodeKind::Memo) {
                self.resolve(source)?;
            }
        }

        match self.state(id) {
            Some(NodeState::Stale) => self.run(id),
            Some(NodeState::Check) => {
                if let Some(node) = self.store.borrow_mut().get_mut(id) {
                    node.mark_clean();
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Execute a computation's body and record what it read.
    ///
    /// A failing memo settles on its error: readers get the error until the
    /// memo's sources change, and the failure counts as a change for its
    /// observers. A failing effect is returned to the flush.
    fn run(&self, id: NodeId) -> Result<(), ReactiveError> {
        if self.tracker.borrow().is_running(id) {
            return Err(self.cycle(id));
        }

        let (body, scope, prev, had_error) = {
            let mut store = self.store.borrow_mut();
            let Some(node) = store.get_mut(id) else {
                return Ok(());
            };
            let Some(body) = node.body().computation() else {
                return Ok(());
            };
            // Clean before running, so a write made by the body itself
            // marks it stale again
            node.mark_clean();
            let had_error = node.error.take().is_some();
            (body, node.scope(), node.value.clone(), had_error)
        };
        trace!(node = %id, "running computation");

        // Tear down what the previous run created
        if let Some(scope) = scope {
            let teardown = self.owners.borrow_mut().reset(scope);
            self.release(teardown);
        }

        let ctx = ReactiveContext::enter(&self.tracker, Frame::tracking(id, scope.unwrap_or(self.root)));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body.run(prev.as_deref())));
        let sources = ctx.exit();

        let mut store = self.store.borrow_mut();
        store.replace_sources(id, sources);

        let failure = match outcome {
            Ok(Ok(next)) => {
                let Some(node) = store.get_mut(id) else {
                    return Ok(());
                };
                node.runs += 1;
                let changed = next.is_some() || had_error;
                if let Some(value) = next {
                    node.value = Some(value);
                }
                if changed {
                    node.version += 1;
                    self.scheduler.borrow_mut().mark_changed(&mut store, id);
                }
                return Ok(());
            }
            Ok(Err(err)) => ReactiveError::user(id, err),
            Err(payload) => ReactiveError::from_panic(id, payload),
        };

        let Some(node) = store.get_mut(id) else {
            return Err(failure);
        };
        node.runs += 1;
        if node.kind() != NodeKind::Memo {
            return Err(failure);
        }
        if failure.is_fatal() {
            // Retry on the next read
            node.mark_stale();
            return Err(failure);
        }

        debug!(node = %id, error = %failure, "memo failed");
        node.error = Some(failure);
        node.version += 1;
        self.scheduler.borrow_mut().mark_changed(&mut store, id);
        Ok(())
    }

    /// Resolve queued effects until the queue stays empty.
    pub(crate) fn flush(&self) -> Result<(), ReactiveError> {
        {
            let mut scheduler = self.scheduler.borrow_mut();
            if !scheduler.should_flush() {
                return Ok(());
            }
            scheduler.set_flushing(true);
        }
        let _flushing = FlushGuard {
            scheduler: &self.scheduler,
        };
        self.drain()
    }

    fn drain(&self) -> Result<(), ReactiveError> {
        let limit = self.config.max_flush_iterations.max(1);
        let mut iterations = 0;
        let mut unhandled: Option<ReactiveError> = None;

        loop {
            let mut wave = self.scheduler.borrow_mut().take_pending();
            // Effects already settled earlier in this flush owe nothing
            wave.retain(|id| self.state(*id).is_some_and(|state| state != NodeState::Clean));
            if wave.is_empty() {
                break;
            }
            if iterations == limit {
                warn!(limit, pending = wave.len(), "flush did not settle");
                self.scheduler.borrow_mut().clear_pending();
                return Err(ReactiveError::RunawayFlush {
                    iterations,
                    pending: wave,
                });
            }
            iterations += 1;

            // Each effect fails on its own; siblings still resolve
            for id in wave {
                self.scheduler.borrow_mut().set_resolving(Some(id));
                let resolved = self.resolve(id);
                self.scheduler.borrow_mut().set_resolving(None);

                match resolved {
                    Ok(()) => {}
                    Err(err) if err.is_fatal() => {
                        self.scheduler.borrow_mut().clear_pending();
                        return Err(err);
                    }
                    Err(err) => {
                        if !self.report(id, &err) {
                            warn!(node = %id, error = %err, "unhandled effect error");
                            unhandled.get_or_insert(err);
                        }
                    }
                }
            }
        }

        debug!(iterations, "flush settled");
        match unhandled {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Hand `err` to the nearest error handler above `effect`.
    fn report(&self, effect: NodeId, err: &ReactiveError) -> bool {
        let Some(owner) = self.store.borrow().get(effect).map(|node| node.owner()) else {
            return false;
        };
        let handler = self.owners.borrow().find_error_handler(owner);
        match handler {
            Some(handler) => {
                handler(err);
                true
            }
            None => false,
        }
    }

    pub(crate) fn dispose_owner(&self, owner: OwnerId) {
        let teardown = self.owners.borrow_mut().dispose(owner);
        self.release(teardown);
    }

    pub(crate) fn dispose_node(&self, id: NodeId) {
        let Some((owner, scope)) = self.store.borrow().get(id).map(|node| (node.owner(), node.scope())) else {
            return;
        };
        if let Some(scope) = scope {
            self.dispose_owner(scope);
        }
        self.owners.borrow_mut().release(owner, id);
        self.release(Teardown {
            nodes: vec![id],
            ..Teardown::default()
        });
    }

    /// Remove released nodes, then run released cleanups.
    pub(crate) fn release(&self, teardown: Teardown) {
        let Teardown {
            nodes,
            cleanups,
            owners,
        } = teardown;
        if nodes.is_empty() && cleanups.is_empty() {
            return;
        }

        let removed: Vec<_> = {
            let mut store = self.store.borrow_mut();
            let mut scheduler = self.scheduler.borrow_mut();
            nodes
                .iter()
                .filter_map(|id| {
                    scheduler.forget(*id);
                    store.remove(*id)
                })
                .collect()
        };
        trace!(
            nodes = removed.len(),
            owners,
            cleanups = cleanups.len(),
            "released scope"
        );
        // Bodies may own arbitrary user values; drop them with no borrows held
        drop(removed);

        let _ctx = ReactiveContext::enter(&self.tracker, Frame::untracked(self.root));
        for cleanup in cleanups {
            if panic::catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
                warn!("cleanup callback panicked");
            }
        }
    }
}
