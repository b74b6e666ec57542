//! Graph Nodes
//!
//! This module defines the node record that lives in the runtime's arena.
//! Signals, memos and effects share one record; what differs is the
//! [`NodeBody`] tag and the state transitions the scheduler applies.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::error::{BoxError, ReactiveError};
use crate::reactive::OwnerId;

/// Handle to a node in the arena.
///
/// The slot is reused after disposal; the serial is never reused, so a
/// stale handle can always be told apart from the node now in its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    slot: usize,
    serial: u64,
}

impl NodeId {
    pub(crate) fn new(slot: usize, serial: u64) -> Self {
        Self { slot, serial }
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    /// Creation serial, unique for the lifetime of a runtime.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.serial)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source cell (signal). Only ever has observers.
    Source,

    /// A derived computation (memo). Caches its value and is resolved
    /// lazily when read.
    Memo,

    /// An effect. Has sources but no observers, and is resolved eagerly by
    /// every flush that marks it.
    Effect,
}

/// Freshness of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// The cached result is up to date.
    Clean,

    /// Some upstream memo may have changed; resolve sources to find out.
    Check,

    /// A direct source changed; the body must re-run.
    Stale,
}

/// Type-erased computation body.
///
/// `run` receives the previously cached value and yields the next one only
/// when it differs under the node's equality function.
pub(crate) trait Computation {
    fn run(&self, prev: Option<&dyn Any>) -> Result<Option<Rc<dyn Any>>, BoxError>;
}

/// What a node is, together with the body it runs.
#[derive(Clone)]
pub(crate) enum NodeBody {
    Source,
    Memo(Rc<dyn Computation>),
    Effect(Rc<dyn Computation>),
}

impl NodeBody {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            NodeBody::Source => NodeKind::Source,
            NodeBody::Memo(_) => NodeKind::Memo,
            NodeBody::Effect(_) => NodeKind::Effect,
        }
    }

    pub(crate) fn computation(&self) -> Option<Rc<dyn Computation>> {
        match self {
            NodeBody::Source => None,
            NodeBody::Memo(body) | NodeBody::Effect(body) => Some(Rc::clone(body)),
        }
    }
}

pub(crate) type SourceList = SmallVec<[NodeId; 4]>;

/// A node in the dependency graph.
pub(crate) struct Node {
    serial: u64,
    body: NodeBody,
    state: NodeState,

    /// Current value: the cell contents for a source, the cached result
    /// for a memo, always `None` for an effect.
    pub(crate) value: Option<Rc<dyn Any>>,

    /// Set when a memo's latest run failed. Reads report it until the
    /// next run.
    pub(crate) error: Option<ReactiveError>,

    /// Bumped on every observable change of `value` or `error`.
    pub(crate) version: u64,

    /// Nodes read during the most recent run.
    pub(crate) sources: SourceList,

    /// Nodes that read this one during their most recent run.
    pub(crate) observers: IndexSet<NodeId>,

    /// Owner that created this node and will dispose it.
    owner: OwnerId,

    /// Child scope current while the body runs. Computations only.
    scope: Option<OwnerId>,

    pub(crate) runs: usize,
}

impl Node {
    pub(crate) fn new(
        serial: u64,
        body: NodeBody,
        owner: OwnerId,
        scope: Option<OwnerId>,
        value: Option<Rc<dyn Any>>,
    ) -> Self {
        let state = match body.kind() {
            NodeKind::Source => NodeState::Clean,
            // Nothing computed yet
            NodeKind::Memo | NodeKind::Effect => NodeState::Stale,
        };

        Self {
            serial,
            body,
            state,
            value,
            error: None,
            version: 0,
            sources: SourceList::new(),
            observers: IndexSet::new(),
            owner,
            scope,
            runs: 0,
        }
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn kind(&self) -> NodeKind {
        self.body.kind()
    }

    pub(crate) fn body(&self) -> &NodeBody {
        &self.body
    }

    pub(crate) fn owner(&self) -> OwnerId {
        self.owner
    }

    pub(crate) fn scope(&self) -> Option<OwnerId> {
        self.scope
    }

    pub(crate) fn state(&self) -> NodeState {
        self.state
    }

    pub(crate) fn is_effect(&self) -> bool {
        self.kind() == NodeKind::Effect
    }

    pub(crate) fn mark_clean(&mut self) {
        self.state = NodeState::Clean;
    }

    /// Mark as `Check`. Never downgrades `Stale`.
    ///
    /// Returns true if the node was clean, i.e. its observers have not
    /// been marked yet.
    pub(crate) fn mark_check(&mut self) -> bool {
        if self.state == NodeState::Clean {
            self.state = NodeState::Check;
            true
        } else {
            false
        }
    }

    /// Mark as `Stale`, returning the previous state.
    pub(crate) fn mark_stale(&mut self) -> NodeState {
        std::mem::replace(&mut self.state, NodeState::Stale)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("serial", &self.serial)
            .field("kind", &self.kind())
            .field("state", &self.state)
            .field("version", &self.version)
            .field("failed", &self.error.is_some())
            .field("sources", &self.sources)
            .field("observers", &self.observers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Computation for Noop {
        fn run(&self, _prev: Option<&dyn Any>) -> Result<Option<Rc<dyn Any>>, BoxError> {
            Ok(None)
        }
    }

    fn owner() -> OwnerId {
        OwnerId::new(0, 0)
    }

    #[test]
    fn source_node_starts_clean() {
        let node = Node::new(0, NodeBody::Source, owner(), None, None);
        assert_eq!(node.kind(), NodeKind::Source);
        assert_eq!(node.state(), NodeState::Clean);
    }

    #[test]
    fn computation_nodes_start_stale() {
        let memo = Node::new(1, NodeBody::Memo(Rc::new(Noop)), owner(), None, None);
        let effect = Node::new(2, NodeBody::Effect(Rc::new(Noop)), owner(), None, None);

        assert_eq!(memo.state(), NodeState::Stale);
        assert_eq!(effect.state(), NodeState::Stale);
        assert!(effect.is_effect());
        assert!(!memo.is_effect());
    }

    #[test]
    fn check_never_overwrites_stale() {
        let mut node = Node::new(0, NodeBody::Memo(Rc::new(Noop)), owner(), None, None);

        assert!(!node.mark_check());
        assert_eq!(node.state(), NodeState::Stale);

        node.mark_clean();
        assert!(node.mark_check());
        assert_eq!(node.state(), NodeState::Check);

        // Already check: no second propagation
        assert!(!node.mark_check());

        assert_eq!(node.mark_stale(), NodeState::Check);
        assert_eq!(node.state(), NodeState::Stale);
    }

    #[test]
    fn node_ids_display_their_serial() {
        assert_eq!(NodeId::new(3, 42).to_string(), "node#42");
        assert_ne!(NodeId::new(3, 42), NodeId::new(3, 43));
    }
}
