//! Computed Cache
//!
//! Memoization of computed properties.
//!
//! # How It Works
//!
//! 1. On first read, the compute closure runs inside a tracking frame. The
//!    produced value and the exact set of keys it read are captured.
//!
//! 2. The value is cached under the property key, and a one-shot watcher is
//!    registered on the synchronous channel for exactly those keys.
//!
//! 3. Reads while the entry exists return the cached value without running
//!    the closure.
//!
//! 4. When any dependency notifies, the watcher drops the entry, notifies the
//!    computed key itself (so its own watchers and dependent computeds see
//!    the change), and unsubscribes.
//!
//! 5. Dropping an entry any other way (redefining or deleting the property)
//!    also removes its watcher, so stale dependencies never reach the key.
//!
//! 6. The next read recomputes and records a fresh dependency set, which may
//!    differ from the previous one when the closure branches on data.
//!
//! Invalidation is synchronous, so a chain `c2 -> c1 -> foo` is fully
//! invalidated before the write to `foo` returns, while external watchers
//! still see the change only at the next flush.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::observable::Observable;
use super::subscriber::{Watch, WatchTarget, WatcherId};
use super::Key;
use crate::error::Result;
use crate::store::ComputeFn;
use crate::value::Value;

#[derive(Debug)]
struct Cached {
    value: Value,
    /// Invalidation watcher on the sync channel; `None` for constants.
    watcher: Option<WatcherId>,
}

/// Per-observable cache of computed values.
#[derive(Debug, Default)]
pub(crate) struct ComputedCache {
    entries: Mutex<HashMap<Key, Cached>>,
}

impl ComputedCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return the cached value of `key`, computing it if needed.
    ///
    /// A failing compute closure caches nothing and registers nothing; the
    /// error goes to the reader.
    pub(crate) fn get_or_compute(
        &self,
        owner: &Observable,
        key: &str,
        compute: &ComputeFn,
    ) -> Result<Value> {
        if let Some(cached) = self.entries.lock().get(key) {
            tracing::trace!(key, "computed cache hit");
            return Ok(cached.value.clone());
        }

        tracing::trace!(key, "computed cache miss");
        let (result, dependencies) = owner.tracker().track_with(|| compute(owner));
        let value = result?;

        let watcher = (!dependencies.is_empty()).then(|| {
            let weak = owner.downgrade();
            let computed_key = key.to_owned();
            owner.watch_sync(WatchTarget::Keys(dependencies), move |_| {
                if let Some(owner) = weak.upgrade() {
                    tracing::trace!(key = %computed_key, "computed cache invalidated");
                    owner.cache().invalidate(&owner, &computed_key);
                    owner.notify(&computed_key);
                }
                Watch::Stop
            })
        });

        let replaced = self.entries.lock().insert(
            key.to_owned(),
            Cached {
                value: value.clone(),
                watcher,
            },
        );
        // A concurrent reader may have cached first; its watcher is now orphaned.
        if let Some(id) = replaced.and_then(|cached| cached.watcher) {
            owner.unwatch(id);
        }

        Ok(value)
    }

    /// Drop the cached value of `key` together with its invalidation
    /// watcher. Returns whether a value was cached.
    pub(crate) fn invalidate(&self, owner: &Observable, key: &str) -> bool {
        let removed = self.entries.lock().remove(key);
        match removed {
            Some(cached) => {
                if let Some(id) = cached.watcher {
                    owner.unwatch(id);
                }
                true
            }
            None => false,
        }
    }

    /// Whether `key` currently has a cached value.
    #[cfg(test)]
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::Definition;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn counting_double(count: Arc<AtomicI32>) -> Definition {
        Definition::computed(move |obs| {
            count.fetch_add(1, Ordering::SeqCst);
            let foo = obs.get("foo")?.as_i64().unwrap_or(0);
            Ok(Value::from(foo * 2))
        })
    }

    #[test]
    fn caches_until_dependency_notifies() {
        let obs = Observable::new(json!({ "foo": 2 })).unwrap();
        let count = Arc::new(AtomicI32::new(0));
        obs.define("doubled", counting_double(count.clone())).unwrap();

        assert!(!obs.cache().contains("doubled"));
        assert_eq!(obs.get("doubled").unwrap(), Value::from(4));
        assert_eq!(obs.get("doubled").unwrap(), Value::from(4));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(obs.cache().contains("doubled"));

        obs.set("foo", 5).unwrap();
        assert!(!obs.cache().contains("doubled"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert_eq!(obs.get("doubled").unwrap(), Value::from(10));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unrelated_writes_keep_cache() {
        let obs = Observable::new(json!({ "foo": 1, "bar": 1 })).unwrap();
        let count = Arc::new(AtomicI32::new(0));
        obs.define("doubled", counting_double(count.clone())).unwrap();

        obs.get("doubled").unwrap();
        obs.set("bar", 2).unwrap();
        obs.get("doubled").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_compute_caches_nothing() {
        let obs = Observable::new(json!({ "ok": false })).unwrap();
        obs.define(
            "checked",
            Definition::computed(|obs| match obs.get("ok")?.as_bool() {
                Some(true) => Ok(Value::from("fine")),
                _ => Err(Error::compute("not ok")),
            }),
        )
        .unwrap();

        assert!(matches!(obs.get("checked"), Err(Error::Compute(_))));
        assert!(!obs.cache().contains("checked"));

        obs.set("ok", true).unwrap();
        assert_eq!(obs.get("checked").unwrap(), Value::from("fine"));
    }

    #[test]
    fn constant_computed_registers_no_watcher() {
        let obs = Observable::new(json!({})).unwrap();
        obs.define("answer", Definition::computed(|_| Ok(Value::from(42))))
            .unwrap();

        assert_eq!(obs.get("answer").unwrap(), Value::from(42));
        assert_eq!(obs.sync_watcher_count(), 0);
    }

    #[test]
    fn redefine_drops_old_dependencies() {
        let obs = Observable::new(json!({ "foo": 1, "bar": 10 })).unwrap();
        obs.define("c", Definition::computed(|obs| obs.get("foo"))).unwrap();
        assert_eq!(obs.get("c").unwrap(), Value::from(1));
        assert_eq!(obs.sync_watcher_count(), 1);

        let count = Arc::new(AtomicI32::new(0));
        let c = count.clone();
        obs.define(
            "c",
            Definition::computed(move |obs| {
                c.fetch_add(1, Ordering::SeqCst);
                obs.get("bar")
            }),
        )
        .unwrap();
        assert_eq!(obs.sync_watcher_count(), 0);
        assert_eq!(obs.get("c").unwrap(), Value::from(10));
        obs.tick();

        let fired = Arc::new(AtomicI32::new(0));
        let f = fired.clone();
        obs.watch("c", move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        obs.set("foo", 2).unwrap();
        obs.tick();

        assert_eq!(obs.get("c").unwrap(), Value::from(10));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(obs.sync_watcher_count(), 1);
    }

    #[test]
    fn delete_drops_invalidation_watcher() {
        let obs = Observable::new(json!({ "foo": 1 })).unwrap();
        let count = Arc::new(AtomicI32::new(0));
        obs.define("doubled", counting_double(count)).unwrap();
        obs.get("doubled").unwrap();
        assert_eq!(obs.sync_watcher_count(), 1);

        assert!(obs.delete("doubled").unwrap());
        assert_eq!(obs.sync_watcher_count(), 0);
        assert!(!obs.cache().contains("doubled"));
    }

    #[test]
    fn dependency_set_follows_branches() {
        let obs = Observable::new(json!({ "flag": true, "a": 1, "b": 2 })).unwrap();
        let count = Arc::new(AtomicI32::new(0));
        let c = count.clone();
        obs.define(
            "pick",
            Definition::computed(move |obs| {
                c.fetch_add(1, Ordering::SeqCst);
                if obs.get("flag")?.as_bool() == Some(true) {
                    obs.get("a")
                } else {
                    obs.get("b")
                }
            }),
        )
        .unwrap();

        assert_eq!(obs.get("pick").unwrap(), Value::from(1));
        obs.set("b", 20).unwrap();
        assert_eq!(obs.get("pick").unwrap(), Value::from(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        obs.set("flag", false).unwrap();
        assert_eq!(obs.get("pick").unwrap(), Value::from(20));
        obs.set("a", 10).unwrap();
        assert_eq!(obs.get("pick").unwrap(), Value::from(20));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
