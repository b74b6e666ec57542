//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, and effects,
//! plus the owner scopes that decide how long each of them lives.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a running memo or effect, the signal automatically registers that
//! computation as an observer. When the signal's value changes, all observers
//! are invalidated.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changes, and only when it is read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects are used to synchronize reactive state with external systems,
//! such as updating the DOM or logging.
//!
//! ## Owners
//!
//! Every node belongs to an owner. Roots are top-level owners, and every
//! memo or effect owns whatever its body creates. Disposing an owner
//! disposes its subtree and runs its cleanups.
//!
//! # Implementation Notes
//!
//! Each [`Runtime`] keeps a stack of running computations. When a node is
//! read, the runtime checks the top of that stack and, if a computation is
//! running, records the dependency.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod context;
mod effect;
mod memo;
mod owner;
mod runtime;
mod signal;
mod trigger;

pub use effect::Effect;
pub use memo::Memo;
pub use owner::{OwnerId, Root};
pub use runtime::{Runtime, RuntimeConfig, WeakRuntime, DEFAULT_MAX_FLUSH_ITERATIONS};
pub use signal::{ReadSignal, Signal, WriteSignal};
pub use trigger::Trigger;
