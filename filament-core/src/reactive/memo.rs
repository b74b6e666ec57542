//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. Nothing runs at creation. The first read computes and caches the value.
//!
//! 2. When accessed again, if no dependencies have changed, returns the
//!    cached value without running anything.
//!
//! 3. When a direct dependency changes, the memo is marked `Stale`; when
//!    something further upstream changes, it is marked `Check`.
//!
//! 4. On next access, a `Check` memo first brings its memo sources up to
//!    date. If none of them produced a new value, it is marked clean and
//!    the cache is returned.
//!
//! 5. A recomputation that yields a value equal to the cached one keeps the
//!    old value and does not invalidate observers.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 memos depend on it
//! - Only the memos actually read will recompute
//! - Memos that are never read stay stale (no wasted work)

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use super::runtime::{upgrade, RuntimeInner};
use super::signal::downcast;
use crate::error::{raise, BoxError, ReactiveError};
use crate::graph::{Computation, NodeId, NodeState};

/// The type-erased body stored in the graph for a memo.
pub(crate) struct MemoBody<T, F, E> {
    compute: F,
    equals: E,
    _value: PhantomData<fn() -> T>,
}

impl<T, F, E> MemoBody<T, F, E> {
    pub(crate) fn new(compute: F, equals: E) -> Self {
        Self {
            compute,
            equals,
            _value: PhantomData,
        }
    }
}

impl<T, F, E> Computation for MemoBody<T, F, E>
where
    T: 'static,
    F: Fn() -> T,
    E: Fn(&T, &T) -> bool,
{
    fn run(&self, prev: Option<&dyn Any>) -> Result<Option<Rc<dyn Any>>, BoxError> {
        let next = (self.compute)();
        match prev.and_then(|prev| prev.downcast_ref::<T>()) {
            Some(prev) if (self.equals)(prev, &next) => Ok(None),
            _ => Ok(Some(Rc::new(next))),
        }
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use filament_core::Runtime;
///
/// let rt = Runtime::new();
/// let first = rt.create_signal("Ada".to_string());
/// let last = rt.create_signal("Lovelace".to_string());
///
/// let (f, l) = (first.clone(), last.clone());
/// let full = rt.create_memo(move || format!("{} {}", f.get(), l.get()));
///
/// assert_eq!(full.get(), "Ada Lovelace");
/// ```
pub struct Memo<T> {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
    _value: PhantomData<fn() -> T>,
}

impl<T: 'static> Memo<T> {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, id: NodeId) -> Self {
        Self {
            runtime,
            id,
            _value: PhantomData,
        }
    }

    /// Get the memo's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    fn read<R>(&self, tracked: bool, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        let rt = upgrade(&self.runtime, self.id)?;
        let value = rt.read_memo(self.id, tracked)?;
        Ok(f(downcast::<T>(&*value, self.id)?))
    }

    /// Get the current value, recomputing first if needed.
    ///
    /// # Panics
    ///
    /// Panics with a [`ReactiveError`] payload if the memo was disposed, is
    /// part of a dependency cycle, or its function panicked. Use
    /// [`try_get`](Self::try_get) to handle those instead.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    pub fn try_get(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| raise(err))
    }

    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        self.read(true, f)
    }

    /// Get the current value without tracking dependencies.
    ///
    /// The memo is still brought up to date.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.read(false, T::clone).unwrap_or_else(|err| raise(err))
    }

    /// Current state, or `None` once disposed.
    pub fn state(&self) -> Option<NodeState> {
        self.runtime.upgrade()?.state(self.id)
    }

    /// Check if the memo needs recomputation.
    pub fn is_dirty(&self) -> bool {
        self.state().is_some_and(|state| state != NodeState::Clean)
    }

    /// Number of times the function produced a new value.
    pub fn version(&self) -> Option<u64> {
        self.runtime.upgrade()?.version(self.id)
    }

    /// Number of times the function has run.
    pub fn run_count(&self) -> usize {
        self.runtime
            .upgrade()
            .and_then(|rt| rt.run_count(self.id))
            .unwrap_or(0)
    }

    /// Get the number of dependencies from the last run.
    pub fn dependency_count(&self) -> usize {
        self.runtime.upgrade().map_or(0, |rt| rt.source_count(self.id))
    }

    pub fn is_alive(&self) -> bool {
        self.runtime.upgrade().is_some_and(|rt| rt.is_alive(self.id))
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            id: self.id,
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo").field("id", &self.id).finish()
    }
}
