//! Asynchronous notification queue.
//!
//! Keys notified between two microtask boundaries are collected here and
//! delivered together by one flush. A key notified several times before the
//! flush is delivered once, at the position of its first notification.

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::Key;

#[derive(Debug, Default)]
struct QueueState {
    pending: IndexSet<Key>,
    scheduled: bool,
}

/// Pending keys plus the "flush scheduled" flag.
#[derive(Debug, Default)]
pub(crate) struct NotifyQueue {
    state: Mutex<QueueState>,
}

impl NotifyQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add `key` to the pending set.
    ///
    /// Returns `true` when the caller must schedule a flush, i.e. when no
    /// flush was scheduled yet.
    pub(crate) fn enqueue(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        if !state.pending.contains(key) {
            state.pending.insert(key.to_owned());
        }
        let schedule = !state.scheduled;
        state.scheduled = true;
        schedule
    }

    /// Take every pending key in first-inserted order and clear the
    /// scheduled flag, so notifications made during delivery schedule a new
    /// flush.
    pub(crate) fn drain(&self) -> Vec<Key> {
        let mut state = self.state.lock();
        state.scheduled = false;
        std::mem::take(&mut state.pending).into_iter().collect()
    }

    /// Whether no keys are waiting for delivery.
    pub(crate) fn is_settled(&self) -> bool {
        self.state.lock().pending.is_empty()
    }
}
