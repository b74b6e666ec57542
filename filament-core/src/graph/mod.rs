//! Dependency Graph
//!
//! This module implements the graph that tracks relationships between
//! reactive values and computations.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent reactive values (signals) or computations (memos, effects)
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a signal changes, the scheduler walks the graph outward and marks
//! affected nodes `Stale` or `Check`. Queued effects are then resolved by
//! the runtime, which re-runs only what actually changed.
//!
//! # Design Decisions
//!
//! 1. All nodes live in one arena per runtime and refer to each other by
//!    [`NodeId`] only. Nodes never hold references to each other, so there
//!    are no reference cycles to break and disposal is plain removal.
//!
//! 2. We maintain both forward (sources) and reverse (observers) edges so
//!    that marking walks outward and resolution walks inward without search.
//!
//! 3. Node kinds are a tagged enum over one record, so marking and
//!    resolution treat signals, memos and effects uniformly.

mod node;
mod scheduler;
mod store;

pub use node::{NodeId, NodeKind, NodeState};
pub(crate) use node::{Computation, NodeBody, SourceList};
pub(crate) use scheduler::Scheduler;
pub(crate) use store::NodeStore;
