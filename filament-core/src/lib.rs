//! Filament Core
//!
//! This crate provides a fine-grained reactive runtime. It implements:
//!
//! - Reactive primitives (signals, memos, effects, triggers)
//! - Glitch-free, two-phase change propagation
//! - Batching and untracked reads
//! - Owner scopes with cleanups, contexts and error handlers
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, owners and the runtime
//! - `graph`: Dependency graph storage and the propagation scheduler
//! - `error`: The errors the runtime reports
//!
//! # Example
//!
//! ```rust
//! use filament_core::Runtime;
//!
//! let rt = Runtime::new();
//!
//! // Create a signal
//! let count = rt.create_signal(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = rt.create_memo(move || c.get() * 2);
//!
//! // Create an effect
//! let (c, d) = (count.clone(), doubled.clone());
//! rt.create_effect(move || {
//!     println!("Count: {}, Doubled: {}", c.get(), d.get());
//! });
//!
//! // Update the signal
//! count.set(5);
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! ```

pub mod error;
pub mod graph;
pub mod reactive;

pub use error::{BoxError, ReactiveError};
pub use graph::{NodeId, NodeKind, NodeState};
pub use reactive::{
    Effect, Memo, OwnerId, ReadSignal, Root, Runtime, RuntimeConfig, Signal, Trigger, WeakRuntime,
    WriteSignal,
};
