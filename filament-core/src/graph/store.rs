//! Node Store
//!
//! The arena that owns every node of one reactive universe. Edges are kept
//! on both ends (`sources` on the observer, `observers` on the source) and
//! every mutation here updates both sides together.

use std::any::Any;
use std::rc::Rc;

use slabmap::SlabMap;

use super::node::{Node, NodeBody, NodeId, SourceList};
use crate::reactive::OwnerId;

/// Arena of nodes, indexed by [`NodeId`].
#[derive(Default)]
pub(crate) struct NodeStore {
    nodes: SlabMap<Node>,
    next_serial: u64,
}

impl NodeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &mut self,
        body: NodeBody,
        owner: OwnerId,
        scope: Option<OwnerId>,
        value: Option<Rc<dyn Any>>,
    ) -> NodeId {
        let serial = self.next_serial;
        self.next_serial += 1;

        let slot = self.nodes.insert(Node::new(serial, body, owner, scope, value));
        NodeId::new(slot, serial)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.slot()).filter(|node| node.serial() == id.serial())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.slot()).filter(|node| node.serial() == id.serial())
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Remove a node and every edge it participates in.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        if !self.contains(id) {
            return None;
        }
        let node = self.nodes.remove(id.slot())?;

        for source in &node.sources {
            if let Some(source) = self.get_mut(*source) {
                source.observers.shift_remove(&id);
            }
        }
        for observer in &node.observers {
            if let Some(observer) = self.get_mut(*observer) {
                observer.sources.retain(|s| *s != id);
            }
        }

        Some(node)
    }

    /// Add the edge `source -> observer`.
    ///
    /// Returns false when either end is gone.
    pub(crate) fn add_edge(&mut self, source: NodeId, observer: NodeId) -> bool {
        if !self.contains(source) || !self.contains(observer) {
            return false;
        }
        if let Some(node) = self.get_mut(source) {
            node.observers.insert(observer);
        }
        if let Some(node) = self.get_mut(observer) {
            if !node.sources.contains(&source) {
                node.sources.push(source);
            }
        }
        true
    }

    pub(crate) fn remove_edge(&mut self, source: NodeId, observer: NodeId) {
        if let Some(node) = self.get_mut(source) {
            node.observers.shift_remove(&observer);
        }
        if let Some(node) = self.get_mut(observer) {
            node.sources.retain(|s| *s != source);
        }
    }

    /// Replace the source set of `observer` with the reads of its latest
    /// run, dropping edges to sources it no longer reads.
    pub(crate) fn replace_sources(&mut self, observer: NodeId, next: SourceList) {
        let Some(node) = self.get_mut(observer) else {
            return;
        };
        let previous = std::mem::take(&mut node.sources);

        for source in previous.iter().filter(|s| !next.contains(s)) {
            self.remove_edge(*source, observer);
        }

        let mut kept = SourceList::new();
        for source in next {
            if let Some(node) = self.get_mut(source) {
                node.observers.insert(observer);
                kept.push(source);
            }
        }
        if let Some(node) = self.get_mut(observer) {
            node.sources = kept;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::graph::node::Computation;
    use smallvec::smallvec;

    struct Noop;

    impl Computation for Noop {
        fn run(&self, _prev: Option<&dyn Any>) -> Result<Option<Rc<dyn Any>>, BoxError> {
            Ok(None)
        }
    }

    fn owner() -> OwnerId {
        OwnerId::new(0, 0)
    }

    fn source(store: &mut NodeStore) -> NodeId {
        store.insert(NodeBody::Source, owner(), None, None)
    }

    fn memo(store: &mut NodeStore) -> NodeId {
        store.insert(NodeBody::Memo(Rc::new(Noop)), owner(), None, None)
    }

    /// Every edge must be recorded on both ends.
    fn assert_consistent(store: &NodeStore, ids: &[NodeId]) {
        for &id in ids {
            let Some(node) = store.get(id) else { continue };
            for source in &node.sources {
                assert!(store.get(*source).unwrap().observers.contains(&id));
            }
            for observer in &node.observers {
                assert!(store.get(*observer).unwrap().sources.contains(&id));
            }
        }
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut store = NodeStore::new();

        let id1 = source(&mut store);
        let id2 = memo(&mut store);
        assert_eq!(store.len(), 2);

        assert!(store.remove(id1).is_some());
        assert_eq!(store.len(), 1);
        assert!(store.get(id1).is_none());
        assert!(store.get(id2).is_some());

        // Removal is idempotent
        assert!(store.remove(id1).is_none());
    }

    #[test]
    fn stale_handles_do_not_alias_reused_slots() {
        let mut store = NodeStore::new();

        let old = source(&mut store);
        store.remove(old);
        let new = source(&mut store);

        // A handle carrying the new slot but the old serial is stale
        let forged = NodeId::new(new.slot(), old.serial());
        assert!(store.get(forged).is_none());
        assert!(store.get(old).is_none());
        assert!(store.get(new).is_some());
    }

    #[test]
    fn add_and_remove_edges() {
        let mut store = NodeStore::new();
        let source_id = source(&mut store);
        let derived_id = memo(&mut store);

        assert!(store.add_edge(source_id, derived_id));
        assert!(store.get(source_id).unwrap().observers.contains(&derived_id));
        assert!(store.get(derived_id).unwrap().sources.contains(&source_id));
        assert_consistent(&store, &[source_id, derived_id]);

        store.remove_edge(source_id, derived_id);
        assert!(store.get(source_id).unwrap().observers.is_empty());
        assert!(store.get(derived_id).unwrap().sources.is_empty());
    }

    #[test]
    fn removing_a_node_severs_both_directions() {
        let mut store = NodeStore::new();
        let a = source(&mut store);
        let b = memo(&mut store);
        let c = memo(&mut store);

        store.add_edge(a, b);
        store.add_edge(b, c);
        store.remove(b);

        assert!(store.get(a).unwrap().observers.is_empty());
        assert!(store.get(c).unwrap().sources.is_empty());
        assert_consistent(&store, &[a, b, c]);
    }

    #[test]
    fn replace_sources_drops_unread_edges() {
        let mut store = NodeStore::new();
        let a = source(&mut store);
        let b = source(&mut store);
        let c = source(&mut store);
        let m = memo(&mut store);

        store.add_edge(a, m);
        store.add_edge(b, m);

        store.replace_sources(m, smallvec![b, c]);

        assert!(!store.get(a).unwrap().observers.contains(&m));
        assert!(store.get(b).unwrap().observers.contains(&m));
        assert!(store.get(c).unwrap().observers.contains(&m));
        assert_eq!(store.get(m).unwrap().sources.as_slice(), &[b, c]);
        assert_consistent(&store, &[a, b, c, m]);
    }
}
