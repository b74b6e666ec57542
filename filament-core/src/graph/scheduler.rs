//! Update Scheduler
//!
//! The scheduler decides which computations a write invalidates and keeps
//! the queue of effects the next flush must resolve.
//!
//! # Algorithm
//!
//! Propagation is two-phase rather than a topological sort:
//!
//! 1. Mark: direct observers of the written node become `Stale`; everything
//!    reachable beyond them becomes `Check` (never overwriting `Stale`).
//!    Every effect touched on the way is queued.
//! 2. Resolve (driven by the runtime): each queued effect resolves its memo
//!    sources first, recursively, and re-runs only if one of them actually
//!    produced a new value.
//!
//! Memos are never queued; they resolve on demand when read.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexSet;
use tracing::trace;

use super::node::{NodeId, NodeState};
use super::store::NodeStore;

/// Pending effects plus batch/flush bookkeeping for one runtime.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    /// Effects awaiting resolution, in the order they were marked.
    pending: IndexSet<NodeId>,

    /// Nesting depth of `batch` calls.
    batch_depth: usize,

    /// Whether a flush is draining the queue right now.
    flushing: bool,

    /// The effect the flush is resolving, if any.
    resolving: Option<NodeId>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark the observers of a changed node.
    ///
    /// Returns the number of nodes whose state changed.
    pub(crate) fn mark_changed(&mut self, store: &mut NodeStore, changed: NodeId) -> usize {
        let observers: Vec<NodeId> = match store.get(changed) {
            Some(node) => node.observers.iter().copied().collect(),
            None => return 0,
        };
        self.mark_stale(store, observers)
    }

    /// Mark `direct` stale and everything downstream of them `Check`.
    ///
    /// The walk visits every reachable node once rather than stopping at
    /// nodes that are already marked: an effect left unresolved by an
    /// aborted flush still has to be found and queued again.
    pub(crate) fn mark_stale(
        &mut self,
        store: &mut NodeStore,
        direct: impl IntoIterator<Item = NodeId>,
    ) -> usize {
        let mut marked = 0;
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        for id in direct {
            let Some(node) = store.get_mut(id) else {
                continue;
            };
            let previous = node.mark_stale();
            if previous != NodeState::Stale {
                marked += 1;
            }
            if node.is_effect() {
                self.schedule(id, previous);
            }
            if visited.insert(id) {
                queue.extend(node.observers.iter().copied());
            }
        }

        // BFS to propagate check status
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = store.get_mut(id) else {
                continue;
            };
            let previous = node.state();
            if node.mark_check() {
                marked += 1;
            }
            if node.is_effect() {
                self.schedule(id, previous);
            }
            queue.extend(node.observers.iter().copied());
        }

        trace!(marked, pending = self.pending.len(), "marked observers");
        marked
    }

    /// Queue an effect reached by marking.
    ///
    /// The effect being resolved right now re-runs within that resolution
    /// when a source it already settled changes, so it is only queued again
    /// for changes made after its body started (it was clean by then).
    fn schedule(&mut self, effect: NodeId, previous: NodeState) {
        if previous == NodeState::Clean || self.resolving != Some(effect) {
            self.pending.insert(effect);
        }
    }

    /// Record which effect the flush is resolving.
    pub(crate) fn set_resolving(&mut self, effect: Option<NodeId>) {
        self.resolving = effect;
    }

    pub(crate) fn enqueue(&mut self, effect: NodeId) {
        self.pending.insert(effect);
    }

    /// Drop a disposed node from the queue.
    pub(crate) fn forget(&mut self, id: NodeId) {
        self.pending.shift_remove(&id);
    }

    /// Take the current wave of pending effects, in marking order.
    pub(crate) fn take_pending(&mut self) -> Vec<NodeId> {
        self.pending.drain(..).collect()
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Leave one batch level. Returns true at the outermost boundary.
    pub(crate) fn end_batch(&mut self) -> bool {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        self.batch_depth == 0
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    pub(crate) fn set_flushing(&mut self, flushing: bool) {
        self.flushing = flushing;
    }

    /// Whether a write right now should flush before returning.
    pub(crate) fn should_flush(&self) -> bool {
        !self.flushing && self.batch_depth == 0
    }
}
