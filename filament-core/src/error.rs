//! Error Types
//!
//! Every failure the runtime can report is a variant of [`ReactiveError`].
//! Cycles and runaway flushes are programming errors in the graph shape and
//! abort the operation that hit them. Errors raised by user bodies are
//! caught at the effect that ran them and routed to the nearest owner's
//! error handler, or returned to whoever triggered the flush.

use std::any::Any;
use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::NodeId;

/// Error produced by a user computation body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the reactive runtime.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    /// A computation re-entered itself before returning.
    #[error("cyclic dependency: {node} was read while resolving itself (stack: {})", format_path(.path))]
    CyclicDependency {
        /// The node whose resolution was re-entered.
        node: NodeId,
        /// The active computations at the time, outermost first.
        path: Vec<NodeId>,
    },

    /// A node was read or written after its owner was disposed.
    #[error("{node} was accessed after it was disposed")]
    DisposedNodeAccess { node: NodeId },

    /// Re-entrant writes kept scheduling effects past the configured cap.
    #[error("flush did not settle after {iterations} iterations (still pending: {})", format_path(.pending))]
    RunawayFlush {
        iterations: usize,
        pending: Vec<NodeId>,
    },

    /// A memo or effect body returned an error or panicked.
    #[error("{node} failed: {message}")]
    UserFunction {
        node: NodeId,
        message: String,
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl ReactiveError {
    /// Whether this error aborts a flush outright.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReactiveError::CyclicDependency { .. } | ReactiveError::RunawayFlush { .. }
        )
    }

    /// The node the error is attributed to, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            ReactiveError::CyclicDependency { node, .. }
            | ReactiveError::DisposedNodeAccess { node }
            | ReactiveError::UserFunction { node, .. } => Some(*node),
            ReactiveError::RunawayFlush { .. } => None,
        }
    }

    pub(crate) fn user(node: NodeId, error: BoxError) -> Self {
        ReactiveError::UserFunction {
            node,
            message: error.to_string(),
            source: Some(Arc::from(error)),
        }
    }

    /// Convert a caught panic payload.
    ///
    /// A payload that already is a `ReactiveError` (raised by a nested
    /// `get`/`set`) is passed through unchanged.
    pub(crate) fn from_panic(node: NodeId, payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<ReactiveError>() {
            Ok(err) => return *err,
            Err(payload) => payload,
        };

        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "computation panicked".to_string()
        };

        ReactiveError::UserFunction {
            node,
            message,
            source: None,
        }
    }
}

/// Unwind with the error as the panic payload.
///
/// Used by the infallible accessors; the nearest resolution boundary
/// recovers the typed error via [`ReactiveError::from_panic`].
pub(crate) fn raise(err: ReactiveError) -> ! {
    std::panic::panic_any(err)
}

fn format_path(path: &[NodeId]) -> String {
    let mut out = String::new();
    for (i, id) in path.iter().enumerate() {
        if i > 0 {
            out.push_str(" -> ");
        }
        let _ = write!(out, "{id}");
    }
    if out.is_empty() {
        out.push_str("none");
    }
    out
}
