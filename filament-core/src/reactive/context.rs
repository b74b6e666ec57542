//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! Each runtime owns one [`Tracker`], a stack of frames. Running a memo or
//! effect pushes a frame naming it as the observer; `untrack` and
//! `create_root` push frames with no observer. Every frame also names the
//! owner that nodes created inside it are attached to.
//!
//! The stack lives in the runtime rather than in a thread-local, so
//! independent runtimes on one thread never see each other's frames.

use std::cell::RefCell;

use crate::graph::{NodeId, SourceList};

use super::OwnerId;

/// An entry in the tracking stack.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// The computation whose reads are being recorded, if any.
    observer: Option<NodeId>,
    /// Owner for nodes created while this frame is on top.
    owner: OwnerId,
    /// Distinct nodes read so far, in first-read order.
    sources: SourceList,
}

impl Frame {
    pub(crate) fn tracking(observer: NodeId, owner: OwnerId) -> Self {
        Self {
            observer: Some(observer),
            owner,
            sources: SourceList::new(),
        }
    }

    pub(crate) fn untracked(owner: OwnerId) -> Self {
        Self {
            observer: None,
            owner,
            sources: SourceList::new(),
        }
    }

    pub(crate) fn into_sources(self) -> SourceList {
        self.sources
    }
}

/// The active-computation stack of one runtime.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    frames: Vec<Frame>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn current_observer(&self) -> Option<NodeId> {
        self.frames.last().and_then(|frame| frame.observer)
    }

    pub(crate) fn current_owner(&self) -> Option<OwnerId> {
        self.frames.last().map(|frame| frame.owner)
    }

    /// Whether `id` is running anywhere on the stack.
    pub(crate) fn is_running(&self, id: NodeId) -> bool {
        self.frames.iter().any(|frame| frame.observer == Some(id))
    }

    /// The running computations, outermost first.
    pub(crate) fn path(&self) -> Vec<NodeId> {
        self.frames.iter().filter_map(|frame| frame.observer).collect()
    }

    /// Record a read of `source` in the top frame.
    ///
    /// Returns the observer when this is its first read of `source`, i.e.
    /// when an edge has to be added.
    pub(crate) fn record(&mut self, source: NodeId) -> Option<NodeId> {
        let frame = self.frames.last_mut()?;
        let observer = frame.observer?;
        if observer == source || frame.sources.contains(&source) {
            return None;
        }
        frame.sources.push(source);
        Some(observer)
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Guard that pops the frame when dropped.
///
/// This ensures the stack is properly maintained even if the computation
/// panics.
pub(crate) struct ReactiveContext<'a> {
    tracker: &'a RefCell<Tracker>,
    depth: usize,
    done: bool,
}

impl<'a> ReactiveContext<'a> {
    /// Push `frame` for the lifetime of the returned guard.
    pub(crate) fn enter(tracker: &'a RefCell<Tracker>, frame: Frame) -> Self {
        let mut stack = tracker.borrow_mut();
        stack.frames.push(frame);
        let depth = stack.frames.len();
        drop(stack);

        Self {
            tracker,
            depth,
            done: false,
        }
    }

    /// Pop the frame and hand back the sources it recorded.
    pub(crate) fn exit(mut self) -> SourceList {
        self.done = true;
        self.pop().map(Frame::into_sources).unwrap_or_default()
    }

    fn pop(&self) -> Option<Frame> {
        let mut stack = self.tracker.borrow_mut();

        // Verify we're popping the right frame.
        debug_assert_eq!(
            stack.frames.len(),
            self.depth,
            "ReactiveContext mismatch: expected depth {}, got {}",
            self.depth,
            stack.frames.len()
        );
        stack.frames.pop()
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.pop();
        }
    }
}
