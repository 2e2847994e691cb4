//! Watchers and the watcher registry.
//!
//! A watcher is a callback registered on a property key, on a set of keys,
//! or on every key (the wildcard `*`). Each invocation returns a [`Watch`]
//! saying whether the watcher stays subscribed.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::runtime::FailurePolicy;
use super::{Key, WILDCARD};

/// Unique identifier for a watcher.
///
/// Returned at registration time and accepted by `Observable::unwatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Generate a new unique watcher ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a watcher wants after an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Watch {
    /// Stay subscribed.
    #[default]
    Continue,

    /// Unsubscribe.
    Stop,
}

impl From<()> for Watch {
    fn from(_: ()) -> Self {
        Watch::Continue
    }
}

/// `false` unsubscribes, anything else keeps the watcher.
impl From<bool> for Watch {
    fn from(keep: bool) -> Self {
        if keep {
            Watch::Continue
        } else {
            Watch::Stop
        }
    }
}

/// What a watcher listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// A single key.
    Key(Key),

    /// Any of the listed keys.
    Keys(Vec<Key>),

    /// Every key.
    All,
}

impl From<&str> for WatchTarget {
    fn from(key: &str) -> Self {
        WatchTarget::Key(key.to_owned())
    }
}

impl From<String> for WatchTarget {
    fn from(key: String) -> Self {
        WatchTarget::Key(key)
    }
}

impl From<&[&str]> for WatchTarget {
    fn from(keys: &[&str]) -> Self {
        WatchTarget::Keys(keys.iter().map(|k| (*k).to_owned()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for WatchTarget {
    fn from(keys: [&str; N]) -> Self {
        WatchTarget::Keys(keys.iter().map(|k| (*k).to_owned()).collect())
    }
}

impl From<Vec<Key>> for WatchTarget {
    fn from(keys: Vec<Key>) -> Self {
        WatchTarget::Keys(keys)
    }
}

/// Callback type stored in the registry.
///
/// Receives the changed key, or `None` when the wildcard itself was notified.
pub(crate) type WatchFn = Arc<dyn Fn(Option<&str>) -> Watch + Send + Sync>;

/// Erase a user callback into a [`WatchFn`].
pub(crate) fn watch_fn<F, R>(callback: F) -> WatchFn
where
    F: Fn(Option<&str>) -> R + Send + Sync + 'static,
    R: Into<Watch>,
{
    Arc::new(move |key: Option<&str>| -> Watch { callback(key).into() })
}

/// Per-key watcher lists for one notification channel.
#[derive(Default)]
pub(crate) struct WatcherRegistry {
    buckets: Mutex<HashMap<Key, Vec<(WatcherId, WatchFn)>>>,
}

impl WatcherRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `target`.
    ///
    /// Multi-key targets live in the wildcard bucket behind a filter, so
    /// they observe the same ordering as catch-all watchers.
    pub(crate) fn add(&self, target: WatchTarget, callback: WatchFn) -> WatcherId {
        let id = WatcherId::new();
        let (bucket, callback) = match target {
            WatchTarget::Key(key) => (key, callback),
            WatchTarget::All => (WILDCARD.to_owned(), callback),
            WatchTarget::Keys(keys) => {
                let filtered: WatchFn = Arc::new(move |key: Option<&str>| match key {
                    Some(key) if keys.iter().any(|k| k == key) => callback(Some(key)),
                    _ => Watch::Continue,
                });
                (WILDCARD.to_owned(), filtered)
            }
        };
        self.buckets
            .lock()
            .entry(bucket)
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove a watcher. Returns whether it was registered here.
    pub(crate) fn remove(&self, id: WatcherId) -> bool {
        let mut buckets = self.buckets.lock();
        let mut found = false;
        for watchers in buckets.values_mut() {
            let before = watchers.len();
            watchers.retain(|(wid, _)| *wid != id);
            found |= watchers.len() != before;
        }
        buckets.retain(|_, watchers| !watchers.is_empty());
        found
    }

    /// Deliver a change of `key`: exact-key watchers first, then wildcard
    /// watchers (skipped when `key` is the wildcard itself).
    ///
    /// Watchers added during delivery are not called this round. Watchers
    /// returning [`Watch::Stop`] are removed by ID afterwards, so watchers
    /// registered meanwhile survive.
    pub(crate) fn deliver(&self, key: &str, policy: FailurePolicy) {
        let arg = (key != WILDCARD).then_some(key);
        self.deliver_bucket(key, arg, policy);
        if key != WILDCARD {
            self.deliver_bucket(WILDCARD, arg, policy);
        }
    }

    fn deliver_bucket(&self, bucket: &str, arg: Option<&str>, policy: FailurePolicy) {
        let snapshot: Vec<(WatcherId, WatchFn)> = match self.buckets.lock().get(bucket) {
            Some(watchers) => watchers.clone(),
            None => return,
        };

        let mut stopped = Vec::new();
        for (id, callback) in snapshot {
            let outcome = match policy {
                FailurePolicy::Propagate => callback(arg),
                FailurePolicy::Isolate => {
                    match panic::catch_unwind(AssertUnwindSafe(|| callback(arg))) {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            tracing::error!(key = ?arg, "watcher panicked, continuing delivery");
                            Watch::Continue
                        }
                    }
                }
            };
            if outcome == Watch::Stop {
                stopped.push(id);
            }
        }

        if !stopped.is_empty() {
            let mut buckets = self.buckets.lock();
            if let Some(watchers) = buckets.get_mut(bucket) {
                watchers.retain(|(id, _)| !stopped.contains(id));
                if watchers.is_empty() {
                    buckets.remove(bucket);
                }
            }
        }
    }

    /// Number of watchers registered under `bucket`.
    #[cfg(test)]
    pub(crate) fn count(&self, bucket: &str) -> usize {
        self.buckets.lock().get(bucket).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn counter() -> (Arc<AtomicI32>, Arc<AtomicI32>) {
        let count = Arc::new(AtomicI32::new(0));
        (count.clone(), count)
    }

    #[test]
    fn watcher_ids_are_unique() {
        let id1 = WatcherId::new();
        let id2 = WatcherId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn bool_and_unit_convert_to_watch() {
        assert_eq!(Watch::from(false), Watch::Stop);
        assert_eq!(Watch::from(true), Watch::Continue);
        assert_eq!(Watch::from(()), Watch::Continue);
    }

    #[test]
    fn exact_watchers_run_before_wildcard() {
        let registry = WatcherRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        registry.add(
            WatchTarget::All,
            watch_fn(move |key| o.lock().push(format!("all:{}", key.unwrap_or("-")))),
        );
        let o = order.clone();
        registry.add(
            WatchTarget::from("foo"),
            watch_fn(move |key| o.lock().push(format!("foo:{}", key.unwrap_or("-")))),
        );

        registry.deliver("foo", FailurePolicy::Propagate);
        assert_eq!(*order.lock(), vec!["foo:foo", "all:foo"]);
    }

    #[test]
    fn wildcard_notification_passes_none() {
        let registry = WatcherRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        registry.add(
            WatchTarget::All,
            watch_fn(move |key: Option<&str>| s.lock().push(key.map(str::to_owned))),
        );

        registry.deliver(WILDCARD, FailurePolicy::Propagate);
        assert_eq!(*seen.lock(), vec![None]);
    }

    #[test]
    fn stop_unsubscribes() {
        let registry = WatcherRegistry::new();
        let (count, c) = counter();
        registry.add(
            WatchTarget::from("foo"),
            watch_fn(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                false
            }),
        );

        registry.deliver("foo", FailurePolicy::Propagate);
        registry.deliver("foo", FailurePolicy::Propagate);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count("foo"), 0);
    }

    #[test]
    fn multi_key_filter() {
        let registry = WatcherRegistry::new();
        let (count, c) = counter();
        registry.add(
            WatchTarget::from(["a", "b"]),
            watch_fn(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.deliver("a", FailurePolicy::Propagate);
        registry.deliver("c", FailurePolicy::Propagate);
        registry.deliver("b", FailurePolicy::Propagate);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(registry.count(WILDCARD), 1);
    }

    #[test]
    fn remove_by_id() {
        let registry = WatcherRegistry::new();
        let (count, c) = counter();
        let id = registry.add(
            WatchTarget::from("foo"),
            watch_fn(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        registry.deliver("foo", FailurePolicy::Propagate);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn isolate_keeps_delivering_after_panic() {
        let registry = WatcherRegistry::new();
        let (count, c) = counter();
        registry.add(WatchTarget::from("foo"), watch_fn(|_| -> Watch { panic!("boom") }));
        registry.add(
            WatchTarget::from("foo"),
            watch_fn(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.deliver("foo", FailurePolicy::Isolate);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count("foo"), 2);
    }
}
