//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a running memo or effect, that
//!    computation is recorded as an observer of the signal.
//!
//! 2. When a signal is set to a value that differs from the current one
//!    (by its equality function), every observer is invalidated and pending
//!    effects are flushed.
//!
//! 3. Setting an equal value does nothing at all.
//!
//! # Memory Layout
//!
//! The value lives in the runtime's node arena. A `Signal` handle is just
//! the node id, a weak runtime reference and the equality function, so
//! cloning it is cheap and handles can be moved freely into closures.

use std::any::Any;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{upgrade, RuntimeInner};
use crate::error::{raise, ReactiveError};
use crate::graph::NodeId;

type Equals<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use filament_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_signal(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies observers)
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T> {
    runtime: Weak<RuntimeInner>,
    id: NodeId,
    equals: Equals<T>,
}

pub(crate) fn downcast<T: 'static>(value: &dyn Any, node: NodeId) -> Result<&T, ReactiveError> {
    // Handles are typed at creation, so a mismatch means the id was reused
    value
        .downcast_ref::<T>()
        .ok_or(ReactiveError::DisposedNodeAccess { node })
}

impl<T: 'static> Signal<T> {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, id: NodeId, equals: Equals<T>) -> Self {
        Self {
            runtime,
            id,
            equals,
        }
    }

    /// Get the signal's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    fn read<R>(&self, tracked: bool, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        let rt = upgrade(&self.runtime, self.id)?;
        let value = rt
            .read_source(self.id, tracked)?
            .ok_or(ReactiveError::DisposedNodeAccess { node: self.id })?;
        // No borrow of the runtime is held here; `f` may read other nodes
        Ok(f(downcast::<T>(&*value, self.id)?))
    }

    /// Get the current value.
    ///
    /// If called within a running computation, this also registers that
    /// computation as an observer.
    ///
    /// # Panics
    ///
    /// Panics with [`ReactiveError::DisposedNodeAccess`] if the signal was
    /// disposed. Use [`try_get`](Self::try_get) to handle that instead.
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

    /// Borrow the current value, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| raise(err))
    }

    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        self.read(true, f)
    }

    /// Get the current value without tracking dependencies.
    ///
    /// Use this when you need to read the value without establishing
    /// a reactive dependency.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.read(false, T::clone).unwrap_or_else(|err| raise(err))
    }

    pub fn try_get_untracked(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.read(false, T::clone)
    }

    /// Set a new value and notify observers.
    ///
    /// # Panics
    ///
    /// Panics with a [`ReactiveError`] payload if the signal was disposed or
    /// the triggered flush fails.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            raise(err);
        }
    }

    /// Set a new value, returning any error instead of panicking.
    ///
    /// Writing a value equal to the current one is a no-op: no observer is
    /// invalidated and no effect runs.
    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        let rt = upgrade(&self.runtime, self.id)?;
        let current = rt.read_source(self.id, false)?;

        if let Some(current) = current.as_deref().and_then(|c| c.downcast_ref::<T>()) {
            if (self.equals)(current, &value) {
                return Ok(());
            }
        }
        rt.write(self.id, Some(Rc::new(value)))
    }

    /// Update the value using a function.
    ///
    /// This is useful for updates that depend on the current value. The
    /// current value is read untracked.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        if let Err(err) = self.try_update(f) {
            raise(err);
        }
    }

    pub fn try_update<F>(&self, f: F) -> Result<(), ReactiveError>
    where
        F: FnOnce(&T) -> T,
    {
        let next = self.read(false, f)?;
        self.try_set(next)
    }

    /// Mutate the value in place and notify observers.
    ///
    /// Unlike [`set`](Self::set) there is no equality check: observers are
    /// always invalidated.
    ///
    /// # Panics
    ///
    /// Panics with a [`ReactiveError`] payload if the signal was disposed,
    /// if `f` reads this same signal, or if the triggered flush fails.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.try_with_mut(f).unwrap_or_else(|err| raise(err))
    }

    pub fn try_with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, ReactiveError> {
        let rt = upgrade(&self.runtime, self.id)?;
        let mut lease = Lease {
            rt: &rt,
            id: self.id,
            value: Some(rt.take_value(self.id)?),
        };

        let result = {
            let value = lease
                .value
                .as_mut()
                .and_then(Rc::get_mut)
                .and_then(|value| value.downcast_mut::<T>())
                .ok_or_else(|| ReactiveError::UserFunction {
                    node: self.id,
                    message: "signal value is borrowed by an enclosing read".to_string(),
                    source: None,
                })?;
            f(value)
        };

        let value = lease.value.take();
        drop(lease);
        rt.write(self.id, value)?;
        Ok(result)
    }

    /// Number of accepted writes so far, or `None` once disposed.
    pub fn version(&self) -> Option<u64> {
        self.runtime.upgrade()?.version(self.id)
    }

    /// Number of computations currently reading this signal.
    pub fn observer_count(&self) -> usize {
        self.runtime
            .upgrade()
            .map_or(0, |rt| rt.observer_count(self.id))
    }

    pub fn is_alive(&self) -> bool {
        self.runtime.upgrade().is_some_and(|rt| rt.is_alive(self.id))
    }

    /// Split into a read-only and a write-only handle.
    pub fn split(&self) -> (ReadSignal<T>, WriteSignal<T>) {
        (ReadSignal(self.clone()), WriteSignal(self.clone()))
    }
}

/// Puts a value taken out for in-place mutation back into its node, even if
/// the mutating closure panics.
struct Lease<'a> {
    rt: &'a RuntimeInner,
    id: NodeId,
    value: Option<Rc<dyn Any>>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.rt.restore_value(self.id, value);
        }
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            id: self.id,
            equals: Rc::clone(&self.equals),
        }
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.try_get_untracked().ok())
            .finish()
    }
}

/// Read half of a [`Signal`].
pub struct ReadSignal<T>(Signal<T>);

impl<T: 'static> ReadSignal<T> {
    pub fn id(&self) -> NodeId {
        self.0.id()
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.0.get()
    }

    pub fn try_get(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.0.try_get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.0.with(f)
    }

    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.0.get_untracked()
    }

    pub fn version(&self) -> Option<u64> {
        self.0.version()
    }

    pub fn is_alive(&self) -> bool {
        self.0.is_alive()
    }
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Write half of a [`Signal`].
pub struct WriteSignal<T>(Signal<T>);

impl<T: 'static> WriteSignal<T> {
    pub fn id(&self) -> NodeId {
        self.0.id()
    }

    pub fn set(&self, value: T) {
        self.0.set(value)
    }

    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        self.0.try_set(value)
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        self.0.update(f)
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.0.with_mut(f)
    }
}

impl<T> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
