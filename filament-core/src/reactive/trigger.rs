//! Triggers
//!
//! A trigger is a source cell without a value. Computations subscribe by
//! calling [`Trigger::track`] and are invalidated by [`Trigger::notify`].
//! Useful for state kept outside the graph, such as an interior-mutable
//! collection whose changes the graph cannot observe on its own.

use std::fmt;
use std::rc::Weak;

use super::runtime::{upgrade, RuntimeInner};
use crate::error::{raise, ReactiveError};
use crate::graph::NodeId;

#[derive(Clone)]
pub struct Trigger {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
}

impl Trigger {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, id: NodeId) -> Self {
        Self { runtime, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Subscribe the running computation.
    pub fn track(&self) {
        if let Err(err) = self.try_track() {
            raise(err);
        }
    }

    pub fn try_track(&self) -> Result<(), ReactiveError> {
        let rt = upgrade(&self.runtime, self.id)?;
        rt.read_source(self.id, true).map(|_| ())
    }

    /// Invalidate every subscriber, unconditionally.
    pub fn notify(&self) {
        if let Err(err) = self.try_notify() {
            raise(err);
        }
    }

    pub fn try_notify(&self) -> Result<(), ReactiveError> {
        let rt = upgrade(&self.runtime, self.id)?;
        rt.write(self.id, None)
    }

    /// Number of notifications so far.
    pub fn version(&self) -> Option<u64> {
        self.runtime.upgrade()?.version(self.id)
    }

    pub fn is_alive(&self) -> bool {
        self.runtime.upgrade().is_some_and(|rt| rt.is_alive(self.id))
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger").field("id", &self.id).finish()
    }
}
