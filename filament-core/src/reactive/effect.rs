//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies (or at the end of the enclosing batch).
//!
//! 2. When any dependency changes, the effect is queued and re-runs in the
//!    flush that follows, at most once per flush.
//!
//! 3. Before re-running, the effect tears down whatever its previous run
//!    created, runs the cleanups registered during that run, and tracks new
//!    dependencies during execution.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! Cleanups are registered with [`Runtime::on_cleanup`](crate::Runtime::on_cleanup)
//! inside the effect body. They run before the next execution and when the
//! effect is disposed.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::runtime::RuntimeInner;
use crate::error::BoxError;
use crate::graph::{Computation, NodeId, NodeState};

/// The type-erased body stored in the graph for an effect.
pub(crate) struct EffectBody<F> {
    run: RefCell<F>,
}

impl<F> EffectBody<F> {
    pub(crate) fn new(run: F) -> Self {
        Self {
            run: RefCell::new(run),
        }
    }
}

impl<F> Computation for EffectBody<F>
where
    F: FnMut() -> Result<(), BoxError>,
{
    fn run(&self, _prev: Option<&dyn Any>) -> Result<Option<Rc<dyn Any>>, BoxError> {
        let mut run = self
            .run
            .try_borrow_mut()
            .map_err(|_| BoxError::from("effect body re-entered while running"))?;
        (run)()?;
        Ok(None)
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// Dropping the handle does not stop the effect; it lives until
/// [`dispose`](Self::dispose) is called or its owner is disposed.
///
/// # Example
///
/// ```rust
/// use filament_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_signal(0);
///
/// let c = count.clone();
/// let effect = rt.create_effect(move || {
///     println!("Count is: {}", c.get());
/// });
///
/// count.set(5); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
#[derive(Clone)]
pub struct Effect {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
}

impl Effect {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, id: NodeId) -> Self {
        Self { runtime, id }
    }

    /// Get the effect's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Dispose of the effect, stopping all future executions.
    ///
    /// Its cleanups and everything its last run created are released.
    /// Disposing twice is a no-op.
    pub fn dispose(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            trace!(node = %self.id, "disposing effect");
            rt.dispose_node(self.id);
        }
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        !self.is_alive()
    }

    pub fn is_alive(&self) -> bool {
        self.runtime.upgrade().is_some_and(|rt| rt.is_alive(self.id))
    }

    /// Number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.runtime
            .upgrade()
            .and_then(|rt| rt.run_count(self.id))
            .unwrap_or(0)
    }

    /// Current state, or `None` once disposed.
    pub fn state(&self) -> Option<NodeState> {
        self.runtime.upgrade()?.state(self.id)
    }

    /// Get the number of dependencies from the last run.
    pub fn dependency_count(&self) -> usize {
        self.runtime.upgrade().map_or(0, |rt| rt.source_count(self.id))
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReactiveError, Runtime};
    use std::cell::Cell;

    #[test]
    fn effect_runs_immediately() {
        let rt = Runtime::new();
        let counter = Rc::new(Cell::new(0));

        let c = counter.clone();
        let effect = rt.create_effect(move || {
            c.set(c.get() + 1);
        });

        assert_eq!(counter.get(), 1);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.state(), Some(NodeState::Clean));
    }

    #[test]
    fn effect_reruns_on_change() {
        let rt = Runtime::new();
        let signal = rt.create_signal(0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (s, log) = (signal.clone(), seen.clone());
        let effect = rt.create_effect(move || log.borrow_mut().push(s.get()));

        signal.set(1);
        signal.set(2);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
        assert_eq!(effect.dependency_count(), 1);
    }

    #[test]
    fn effect_dispose() {
        let rt = Runtime::new();
        let signal = rt.create_signal(0);
        let counter = Rc::new(Cell::new(0));

        let (s, c) = (signal.clone(), counter.clone());
        let effect = rt.create_effect(move || {
            s.get();
            c.set(c.get() + 1);
        });
        assert!(!effect.is_disposed());

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(signal.observer_count(), 0);

        signal.set(1);
        assert_eq!(counter.get(), 1);

        // Idempotent
        effect.dispose();
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let rt = Runtime::new();
        let signal = rt.create_signal(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let (s, l, handle) = (signal.clone(), log.clone(), rt.downgrade());
        let effect = rt.create_effect(move || {
            let value = s.get();
            l.borrow_mut().push(format!("run {value}"));
            let l = l.clone();
            if let Some(rt) = handle.upgrade() {
                rt.on_cleanup(move || l.borrow_mut().push(format!("cleanup {value}")));
            }
        });

        signal.set(1);
        effect.dispose();
        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
    }

    #[test]
    fn fallible_effect_reports_its_error() {
        let rt = Runtime::new();
        let signal = rt.create_signal(0);

        let s = signal.clone();
        let _effect = rt.create_fallible_effect(move || {
            if s.get() > 0 {
                return Err("value out of range");
            }
            Ok(())
        });

        match signal.try_set(1) {
            Err(ReactiveError::UserFunction { message, .. }) => {
                assert_eq!(message, "value out of range")
            }
            other => panic!("expected a user error, got {other:?}"),
        }
    }
}
