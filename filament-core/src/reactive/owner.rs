//! Owner Tree
//!
//! Owners are the lifetime scopes of the reactive graph. Every node is
//! created under exactly one owner, and disposing an owner is the only way
//! nodes are destroyed. Each computation also gets a child owner of its own
//! that is current while its body runs; re-running the computation resets
//! that scope first, which tears down whatever the previous run created.
//!
//! The tree only does bookkeeping. Removing nodes from the store and
//! running cleanup callbacks is left to the runtime, which must do it with
//! no borrows held since cleanups are user code.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use slabmap::SlabMap;
use tracing::trace;

use super::runtime::RuntimeInner;
use crate::error::ReactiveError;
use crate::graph::NodeId;

/// Handle to an owner scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId {
    slot: usize,
    serial: u64,
}

impl OwnerId {
    pub(crate) fn new(slot: usize, serial: u64) -> Self {
        Self { slot, serial }
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.serial)
    }
}

pub(crate) type Cleanup = Box<dyn FnOnce()>;
pub(crate) type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

struct Owner {
    serial: u64,
    parent: Option<OwnerId>,
    children: Vec<OwnerId>,
    nodes: Vec<NodeId>,
    cleanups: Vec<Cleanup>,
    error_handler: Option<ErrorHandler>,
    contexts: HashMap<TypeId, Rc<dyn Any>>,
}

/// Everything a disposal released, in the order it must be torn down.
#[derive(Default)]
pub(crate) struct Teardown {
    pub(crate) nodes: Vec<NodeId>,
    /// Children's cleanups before their parent's, each owner's in reverse
    /// registration order.
    pub(crate) cleanups: Vec<Cleanup>,
    pub(crate) owners: usize,
}

#[derive(Default)]
pub(crate) struct OwnerTree {
    owners: SlabMap<Owner>,
    roots: Vec<OwnerId>,
    next_serial: u64,
}

impl OwnerTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create(&mut self, parent: Option<OwnerId>) -> OwnerId {
        let serial = self.next_serial;
        self.next_serial += 1;

        // A dead parent cannot adopt; the scope starts detached
        let parent = parent.filter(|p| self.contains(*p));

        let slot = self.owners.insert(Owner {
            serial,
            parent,
            children: Vec::new(),
            nodes: Vec::new(),
            cleanups: Vec::new(),
            error_handler: None,
            contexts: HashMap::new(),
        });
        let id = OwnerId::new(slot, serial);

        match parent {
            Some(parent) => {
                if let Some(parent) = self.get_mut(parent) {
                    parent.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
        id
    }

    fn get(&self, id: OwnerId) -> Option<&Owner> {
        self.owners.get(id.slot).filter(|o| o.serial == id.serial)
    }

    fn get_mut(&mut self, id: OwnerId) -> Option<&mut Owner> {
        self.owners.get_mut(id.slot).filter(|o| o.serial == id.serial)
    }

    pub(crate) fn contains(&self, id: OwnerId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn parent(&self, id: OwnerId) -> Option<OwnerId> {
        self.get(id).and_then(|o| o.parent)
    }

    /// Record `node` as owned by `owner`. Returns false if the owner is gone.
    pub(crate) fn adopt(&mut self, owner: OwnerId, node: NodeId) -> bool {
        match self.get_mut(owner) {
            Some(owner) => {
                owner.nodes.push(node);
                true
            }
            None => false,
        }
    }

    pub(crate) fn release(&mut self, owner: OwnerId, node: NodeId) {
        if let Some(owner) = self.get_mut(owner) {
            owner.nodes.retain(|n| *n != node);
        }
    }

    /// Returns the cleanup back if the owner is gone.
    pub(crate) fn add_cleanup(&mut self, owner: OwnerId, cleanup: Cleanup) -> Result<(), Cleanup> {
        match self.get_mut(owner) {
            Some(owner) => {
                owner.cleanups.push(cleanup);
                Ok(())
            }
            None => Err(cleanup),
        }
    }

    pub(crate) fn set_error_handler(&mut self, owner: OwnerId, handler: ErrorHandler) -> bool {
        match self.get_mut(owner) {
            Some(owner) => {
                owner.error_handler = Some(handler);
                true
            }
            None => false,
        }
    }

    /// Nearest handler at or above `owner`.
    pub(crate) fn find_error_handler(&self, owner: OwnerId) -> Option<ErrorHandler> {
        let mut current = Some(owner);
        while let Some(id) = current {
            let owner = self.get(id)?;
            if let Some(handler) = &owner.error_handler {
                return Some(Rc::clone(handler));
            }
            current = owner.parent;
        }
        None
    }

    pub(crate) fn provide(&mut self, owner: OwnerId, key: TypeId, value: Rc<dyn Any>) -> bool {
        match self.get_mut(owner) {
            Some(owner) => {
                owner.contexts.insert(key, value);
                true
            }
            None => false,
        }
    }

    /// Nearest context value of type `key` at or above `owner`.
    pub(crate) fn lookup(&self, owner: OwnerId, key: TypeId) -> Option<Rc<dyn Any>> {
        let mut current = Some(owner);
        while let Some(id) = current {
            let owner = self.get(id)?;
            if let Some(value) = owner.contexts.get(&key) {
                return Some(Rc::clone(value));
            }
            current = owner.parent;
        }
        None
    }

    /// Top-level owners, in creation order.
    pub(crate) fn roots(&self) -> Vec<OwnerId> {
        self.roots.clone()
    }

    /// Detach `owner` and its whole subtree.
    pub(crate) fn dispose(&mut self, owner: OwnerId) -> Teardown {
        let mut teardown = Teardown::default();
        if !self.contains(owner) {
            return teardown;
        }

        if let Some(parent) = self.parent(owner).and_then(|p| self.get_mut(p)) {
            parent.children.retain(|c| *c != owner);
        }
        self.collect(owner, true, &mut teardown);
        teardown
    }

    /// Release everything `owner` holds but keep the scope itself.
    ///
    /// Used before a computation re-runs.
    pub(crate) fn reset(&mut self, owner: OwnerId) -> Teardown {
        let mut teardown = Teardown::default();
        self.collect(owner, false, &mut teardown);
        teardown
    }

    fn collect(&mut self, id: OwnerId, remove: bool, teardown: &mut Teardown) {
        let Some(owner) = self.get_mut(id) else {
            return;
        };
        let children = std::mem::take(&mut owner.children);
        let nodes = std::mem::take(&mut owner.nodes);
        let mut cleanups = std::mem::take(&mut owner.cleanups);
        owner.error_handler = None;
        owner.contexts.clear();

        // Depth-first: children go before the parent
        for child in children {
            self.collect(child, true, teardown);
        }

        teardown.nodes.extend(nodes);
        cleanups.reverse();
        teardown.cleanups.extend(cleanups);

        if remove {
            self.owners.remove(id.slot);
            self.roots.retain(|r| *r != id);
            teardown.owners += 1;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.owners.len()
    }
}

/// Handle to a top-level owner created by
/// [`Runtime::create_root`](crate::Runtime::create_root).
#[derive(Clone)]
pub struct Root {
    runtime: Weak<RuntimeInner>,
    owner: OwnerId,
}

impl Root {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, owner: OwnerId) -> Self {
        Self { runtime, owner }
    }

    pub fn id(&self) -> OwnerId {
        self.owner
    }

    /// Dispose every node and child scope created under this root and run
    /// their cleanups, children first. Disposing twice is a no-op.
    pub fn dispose(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            trace!(owner = %self.owner, "disposing root");
            rt.dispose_owner(self.owner);
        }
    }

    pub fn is_disposed(&self) -> bool {
        !self
            .runtime
            .upgrade()
            .is_some_and(|rt| rt.owner_alive(self.owner))
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root").field("owner", &self.owner).finish()
    }
}
