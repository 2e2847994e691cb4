//! Tracking Context
//!
//! The tracking context records which property keys a computation reads.
//! This enables automatic dependency discovery: when a key is read while a
//! frame is active, the key is attributed to that frame.
//!
//! # Implementation
//!
//! Each observable owns its own frame stack. Entering a tracked computation
//! pushes an empty frame; reads record into the top frame only; leaving pops
//! the frame and yields its keys de-duplicated in first-read order.
//!
//! Keeping the stack per observable (instead of thread-local) means two
//! independent reactive graphs never record into each other's frames.
//!
//! The stack supports nesting: a computed property whose closure reads
//! another computed property pushes a second frame while the inner one
//! computes, and the outer frame sees only the inner property's key.

use indexmap::IndexSet;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::Key;

/// Keys recorded by one tracked execution.
type Frame = SmallVec<[Key; 8]>;

/// Per-observable stack of tracking frames.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    frames: Mutex<Vec<Frame>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether a tracked execution is in progress.
    #[cfg(test)]
    pub(crate) fn is_active(&self) -> bool {
        !self.frames.lock().is_empty()
    }

    /// Record a read of `key` into the top frame, if any.
    pub(crate) fn record(&self, key: &str) {
        if let Some(frame) = self.frames.lock().last_mut() {
            frame.push(key.to_owned());
        }
    }

    /// Push a new frame. The frame is popped when the guard is finished or
    /// dropped, so an unwinding computation cannot leave it on the stack.
    pub(crate) fn enter(&self) -> FrameGuard<'_> {
        let depth = {
            let mut frames = self.frames.lock();
            frames.push(Frame::new());
            frames.len()
        };
        FrameGuard {
            tracker: self,
            depth,
            finished: false,
        }
    }

    /// Run `f` inside a fresh frame and return its result together with the
    /// keys it read.
    pub(crate) fn track_with<R>(&self, f: impl FnOnce() -> R) -> (R, Vec<Key>) {
        let guard = self.enter();
        let result = f();
        let keys = guard.finish();
        (result, keys)
    }

    /// Current stack depth.
    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.frames.lock().len()
    }
}

/// Guard that pops its frame when dropped.
pub(crate) struct FrameGuard<'a> {
    tracker: &'a Tracker,
    depth: usize,
    finished: bool,
}

impl FrameGuard<'_> {
    /// Pop the frame and return its de-duplicated keys.
    pub(crate) fn finish(mut self) -> Vec<Key> {
        self.finished = true;
        let frame = self.pop();
        let unique: IndexSet<Key> = frame.into_iter().collect();
        unique.into_iter().collect()
    }

    fn pop(&self) -> Frame {
        let mut frames = self.tracker.frames.lock();
        debug_assert_eq!(
            frames.len(),
            self.depth,
            "tracking frame mismatch: expected depth {}, got {}",
            self.depth,
            frames.len()
        );
        frames.pop().unwrap_or_default()
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}
