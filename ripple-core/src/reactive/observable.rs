//! Observable Implementation
//!
//! An Observable wraps an object or array store and turns every property
//! read and write into a trackable, notifiable event.
//!
//! # How Observables Work
//!
//! 1. A read records the key in the active tracking frame, then returns the
//!    stored value. Computed properties go through the computed cache.
//!    Writable nested objects and arrays are wrapped into child observables
//!    on first read and the child replaces the raw data in place.
//!
//! 2. A write, definition, or deletion updates the store and notifies the
//!    key, whether or not the value actually changed.
//!
//! 3. Notification runs the synchronous channel inline (this is how computed
//!    caches are invalidated) and queues the key on the asynchronous channel,
//!    which is flushed at the next microtask boundary.
//!
//! # Nested Stores
//!
//! A parent owns its children through its store. Each child carries a
//! forwarding watcher holding only a weak reference to the parent: any change
//! inside the child notifies the parent under the child's key and, when the
//! child reports a specific property, under `key.property` as well. The
//! forwarder unsubscribes once the parent is gone or no longer holds the
//! child under that key.
//!
//! # Meta Keys
//!
//! `$isObservable` and `$isSettled` can be read like properties and are never
//! tracked. The method-like meta names are reserved too; reading them is an
//! error and writing any meta key is rejected.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use super::context::Tracker;
use super::effect::EffectHandle;
use super::memo::ComputedCache;
use super::queue::NotifyQueue;
use super::runtime::{FailurePolicy, NextTick, Runtime};
use super::subscriber::{watch_fn, Watch, WatchTarget, WatcherId, WatcherRegistry};
use super::{Key, IS_OBSERVABLE, IS_SETTLED, META_METHODS};
use crate::error::{Error, Result};
use crate::store::{Definition, Entry, Target};
use crate::value::Value;

struct ObservableInner {
    runtime: Runtime,
    target: Mutex<Target>,
    tracker: Tracker,
    cache: ComputedCache,
    queue: NotifyQueue,
    watchers: WatcherRegistry,
    sync_watchers: WatcherRegistry,
}

/// A reactive handle to an object or array store.
///
/// Cloning an `Observable` creates a new handle to the **same** store.
///
/// # Example
///
/// ```rust
/// use ripple_core::{Definition, Observable, Value};
/// use serde_json::json;
///
/// let obs = Observable::new(json!({ "foo": 0 })).unwrap();
/// obs.define(
///     "doubled",
///     Definition::computed(|obs| {
///         let foo = obs.get("foo")?.as_i64().unwrap_or(0);
///         Ok(Value::from(foo * 2))
///     }),
/// )
/// .unwrap();
///
/// obs.set("foo", 5).unwrap();
/// obs.tick();
/// assert_eq!(obs.get("doubled").unwrap(), Value::from(10));
/// ```
#[derive(Clone)]
pub struct Observable {
    inner: Arc<ObservableInner>,
}

/// Non-owning handle used for notification routing.
#[derive(Clone)]
pub(crate) struct WeakObservable {
    inner: Weak<ObservableInner>,
}

impl WeakObservable {
    pub(crate) fn upgrade(&self) -> Option<Observable> {
        self.inner.upgrade().map(|inner| Observable { inner })
    }

    /// Whether this points at the same store as `other`.
    fn is(&self, other: &Observable) -> bool {
        self.inner.as_ptr() == Arc::as_ptr(&other.inner)
    }
}

impl Observable {
    /// Make `store` observable on a fresh runtime.
    ///
    /// Fails unless `store` is an object or array.
    pub fn new(store: JsonValue) -> Result<Self> {
        Self::with_runtime(Runtime::new(), store)
    }

    /// Make `store` observable on an existing runtime.
    pub fn with_runtime(runtime: Runtime, store: JsonValue) -> Result<Self> {
        Ok(Self::from_target(runtime, Target::from_json(store)?))
    }

    /// Make `value` observable. An observable is returned as is, never
    /// wrapped twice.
    pub fn wrap(value: impl Into<Value>) -> Result<Self> {
        match value.into() {
            Value::Observable(obs) => Ok(obs),
            Value::Data(json) => Self::new(json),
            Value::Undefined => Err(Error::NotAStore("undefined")),
        }
    }

    /// Start declaring an object store field by field.
    pub fn builder() -> ObservableBuilder {
        ObservableBuilder::new()
    }

    fn from_target(runtime: Runtime, target: Target) -> Self {
        Self {
            inner: Arc::new(ObservableInner {
                runtime,
                target: Mutex::new(target),
                tracker: Tracker::new(),
                cache: ComputedCache::new(),
                queue: NotifyQueue::new(),
                watchers: WatcherRegistry::new(),
                sync_watchers: WatcherRegistry::new(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakObservable {
        WeakObservable {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn tracker(&self) -> &Tracker {
        &self.inner.tracker
    }

    pub(crate) fn cache(&self) -> &ComputedCache {
        &self.inner.cache
    }

    /// Whether both handles point at the same store.
    pub fn ptr_eq(&self, other: &Observable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The runtime whose microtask queue this observable flushes on.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    // ------------------------------------------------------------------------
    // Meta API
    // ------------------------------------------------------------------------

    /// Identity marker. Always `true`.
    pub fn is_observable(&self) -> bool {
        true
    }

    /// Whether no notifications are waiting for the next flush.
    pub fn is_settled(&self) -> bool {
        self.inner.queue.is_settled()
    }

    /// A future resolving after the next microtask boundary.
    pub fn next_tick(&self) -> NextTick {
        self.inner.runtime.next_tick(None)
    }

    /// Like [`next_tick`](Self::next_tick), running `callback` first.
    pub fn next_tick_with(&self, callback: impl FnOnce() + Send + 'static) -> NextTick {
        self.inner.runtime.next_tick(Some(Box::new(callback)))
    }

    /// Reach the microtask boundary now: drain the runtime's microtask
    /// queue. Returns how many microtasks ran.
    pub fn tick(&self) -> usize {
        self.inner.runtime.run_microtasks()
    }

    /// Notify watchers that `key` changed.
    ///
    /// Synchronous watchers run before this returns; asynchronous watchers
    /// run at the next flush, once per key however often it was notified.
    pub fn notify(&self, key: &str) {
        tracing::trace!(key, "notify");
        self.inner.sync_watchers.deliver(key, FailurePolicy::Propagate);

        if self.inner.queue.enqueue(key) {
            let weak = self.downgrade();
            self.inner.runtime.queue_microtask(move || {
                if let Some(obs) = weak.upgrade() {
                    obs.flush();
                }
            });
        }
    }

    fn flush(&self) {
        let keys = self.inner.queue.drain();
        tracing::debug!(count = keys.len(), "flushing notifications");
        let policy = self.inner.runtime.config().failure_policy;
        for key in keys {
            self.inner.watchers.deliver(&key, policy);
        }
    }

    /// Watch `target` on the asynchronous channel.
    ///
    /// The callback receives the changed key (`None` when the wildcard itself
    /// was notified) and stays subscribed until it returns [`Watch::Stop`]
    /// or `false`.
    pub fn watch<F, R>(&self, target: impl Into<WatchTarget>, callback: F) -> WatcherId
    where
        F: Fn(Option<&str>) -> R + Send + Sync + 'static,
        R: Into<Watch>,
    {
        self.inner.watchers.add(target.into(), watch_fn(callback))
    }

    /// Watch every key on the asynchronous channel.
    pub fn watch_all<F, R>(&self, callback: F) -> WatcherId
    where
        F: Fn(Option<&str>) -> R + Send + Sync + 'static,
        R: Into<Watch>,
    {
        self.watch(WatchTarget::All, callback)
    }

    /// Watch `target` on the synchronous channel: the callback runs inside
    /// the `notify` call that reports the change.
    pub fn watch_sync<F, R>(&self, target: impl Into<WatchTarget>, callback: F) -> WatcherId
    where
        F: Fn(Option<&str>) -> R + Send + Sync + 'static,
        R: Into<Watch>,
    {
        self.inner.sync_watchers.add(target.into(), watch_fn(callback))
    }

    /// Watch every key on the synchronous channel.
    pub fn watch_sync_all<F, R>(&self, callback: F) -> WatcherId
    where
        F: Fn(Option<&str>) -> R + Send + Sync + 'static,
        R: Into<Watch>,
    {
        self.watch_sync(WatchTarget::All, callback)
    }

    /// Remove a watcher from either channel. Returns whether it was found.
    pub fn unwatch(&self, id: WatcherId) -> bool {
        self.inner.watchers.remove(id) || self.inner.sync_watchers.remove(id)
    }

    /// Run `f` and return the keys it read on this observable, in first-read
    /// order without duplicates.
    pub fn track(&self, f: impl FnOnce()) -> Vec<Key> {
        self.inner.tracker.track_with(f).1
    }

    /// Run `run` now and again after every flush in which a key it read
    /// last time changed.
    pub fn effect<F>(&self, run: F) -> EffectHandle
    where
        F: Fn(&Observable) + Send + Sync + 'static,
    {
        EffectHandle::register(self, Arc::new(run))
    }

    // ------------------------------------------------------------------------
    // Property access
    // ------------------------------------------------------------------------

    /// Read `key`, recording it in the active tracking frame.
    pub fn get(&self, key: &str) -> Result<Value> {
        if let Some(meta) = self.meta_value(key)? {
            return Ok(meta);
        }
        self.inner.tracker.record(key);
        self.read(key)
    }

    /// Read `key` without recording it.
    pub fn get_untracked(&self, key: &str) -> Result<Value> {
        if let Some(meta) = self.meta_value(key)? {
            return Ok(meta);
        }
        self.read(key)
    }

    /// Read a dotted path through nested observables, e.g. `"user.name"`.
    ///
    /// Each hop is tracked by the observable it reads from. A hop through
    /// anything but an observable yields `Undefined`.
    pub fn get_path(&self, path: &str) -> Result<Value> {
        let mut segments = path.split('.');
        let Some(first) = segments.next() else {
            return Ok(Value::Undefined);
        };
        let mut current = self.get(first)?;
        for segment in segments {
            current = match current {
                Value::Observable(obs) => obs.get(segment)?,
                _ => return Ok(Value::Undefined),
            };
        }
        Ok(current)
    }

    fn meta_value(&self, key: &str) -> Result<Option<Value>> {
        match key {
            IS_OBSERVABLE => Ok(Some(Value::from(true))),
            IS_SETTLED => Ok(Some(Value::from(self.is_settled()))),
            _ if META_METHODS.contains(&key) => Err(Error::MetaMethod(key.to_owned())),
            _ => Ok(None),
        }
    }

    fn read(&self, key: &str) -> Result<Value> {
        let entry = self.inner.target.lock().get(key);
        match entry {
            None => Ok(Value::Undefined),
            Some(Entry::Computed(compute)) => self.inner.cache.get_or_compute(self, key, &compute),
            Some(Entry::Value { value, writable }) if writable && value.is_plain_store() => {
                self.wrap_child(key, value)
            }
            Some(Entry::Value { value, .. }) => Ok(value),
        }
    }

    /// Wrap plain nested data into a child observable and memoize it in
    /// place of the raw data.
    fn wrap_child(&self, key: &str, value: Value) -> Result<Value> {
        let Value::Data(json) = value else {
            return Ok(value);
        };
        tracing::trace!(key, "wrapping nested store");
        let child = Observable::with_runtime(self.inner.runtime.clone(), json)?;
        self.inner
            .target
            .lock()
            .put(key, Entry::writable(Value::Observable(child.clone())))?;
        self.forward(key, &child);
        Ok(Value::Observable(child))
    }

    /// Re-notify changes inside `child` on this observable under `key` and
    /// `key.property`.
    fn forward(&self, key: &str, child: &Observable) {
        let parent = self.downgrade();
        let this_child = child.downgrade();
        let key = key.to_owned();
        child.watch_all(move |property: Option<&str>| {
            let Some(parent) = parent.upgrade() else {
                return Watch::Stop;
            };
            if !parent.holds(&key, &this_child) {
                return Watch::Stop;
            }
            parent.notify(&key);
            if let Some(property) = property {
                parent.notify(&format!("{key}.{property}"));
            }
            Watch::Continue
        });
    }

    /// Whether `key` currently stores `child`.
    fn holds(&self, key: &str, child: &WeakObservable) -> bool {
        match self.inner.target.lock().get(key) {
            Some(Entry::Value {
                value: Value::Observable(held),
                ..
            }) => child.is(&held),
            _ => false,
        }
    }

    fn check_key(key: &str) -> Result<()> {
        if key == IS_OBSERVABLE || key == IS_SETTLED || META_METHODS.contains(&key) {
            return Err(Error::ReservedKey(key.to_owned()));
        }
        Ok(())
    }

    /// Write `key` and notify it, even if the value is unchanged.
    ///
    /// Read-only and computed properties reject the write without notifying.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        Self::check_key(key)?;
        let value = value.into();
        {
            let mut target = self.inner.target.lock();
            if target.get(key).is_some_and(|entry| !entry.is_writable()) {
                return Err(Error::ReadOnly(key.to_owned()));
            }
            target.put(key, Entry::writable(value.clone()))?;
        }
        if let Value::Observable(child) = &value {
            self.forward(key, child);
        }
        self.notify(key);
        Ok(())
    }

    /// Replace the definition of `key` and notify it.
    ///
    /// Any cached value for `key` is dropped, so redefining a computed
    /// property takes effect on the next read.
    pub fn define(&self, key: &str, definition: Definition) -> Result<()> {
        Self::check_key(key)?;
        let child = match definition.stored_value() {
            Some(Value::Observable(child)) => Some(child.clone()),
            _ => None,
        };
        self.inner.target.lock().put(key, definition.into_entry())?;
        self.inner.cache.invalidate(self, key);
        if let Some(child) = child {
            self.forward(key, &child);
        }
        self.notify(key);
        Ok(())
    }

    /// Remove `key` and notify it. Array elements become holes.
    ///
    /// Returns whether the property existed; the key is notified either way.
    pub fn delete(&self, key: &str) -> Result<bool> {
        Self::check_key(key)?;
        let existed = self.inner.target.lock().remove(key)?;
        self.inner.cache.invalidate(self, key);
        self.notify(key);
        Ok(existed)
    }

    /// Append to an array store, notifying the new index and `length`.
    ///
    /// Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let index = {
            let target = self.inner.target.lock();
            if !target.is_array() {
                return Err(Error::NotAnArray);
            }
            target.len()
        };
        self.set(&index.to_string(), value)?;
        self.notify(crate::store::LENGTH);
        Ok(index + 1)
    }

    /// Property keys in storage order. Not tracked.
    pub fn keys(&self) -> Vec<Key> {
        self.inner.target.lock().keys()
    }

    /// Number of properties (array length for arrays).
    pub fn len(&self) -> usize {
        self.inner.target.lock().len()
    }

    /// Whether the store has no properties.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the store is an array.
    pub fn is_array(&self) -> bool {
        self.inner.target.lock().is_array()
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self, bucket: &str) -> usize {
        self.inner.watchers.count(bucket)
    }

    #[cfg(test)]
    pub(crate) fn sync_watcher_count(&self) -> usize {
        self.inner.sync_watchers.count(super::WILDCARD)
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("is_array", &self.is_array())
            .field("keys", &self.keys())
            .field("settled", &self.is_settled())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Declares an object store with explicit field kinds.
///
/// ```rust
/// use ripple_core::{Observable, Value};
///
/// let obs = Observable::builder()
///     .field("foo", 1)
///     .computed("c1", |obs| obs.get("foo"))
///     .build()
///     .unwrap();
/// assert_eq!(obs.get("c1").unwrap(), Value::from(1));
/// ```
#[derive(Default)]
pub struct ObservableBuilder {
    runtime: Option<Runtime>,
    fields: IndexMap<Key, Entry>,
}

impl ObservableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share `runtime` instead of creating a fresh one.
    pub fn runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// A writable field.
    pub fn field(self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.define(key, Definition::value(value))
    }

    /// A field rejecting writes.
    pub fn read_only(self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.define(key, Definition::read_only(value))
    }

    /// A computed field.
    pub fn computed<F>(self, key: impl Into<Key>, compute: F) -> Self
    where
        F: Fn(&Observable) -> Result<Value> + Send + Sync + 'static,
    {
        self.define(key, Definition::computed(compute))
    }

    pub fn define(mut self, key: impl Into<Key>, definition: Definition) -> Self {
        self.fields.insert(key.into(), definition.into_entry());
        self
    }

    /// Build the observable. Fails if a field uses a reserved meta key.
    pub fn build(self) -> Result<Observable> {
        for key in self.fields.keys() {
            Observable::check_key(key)?;
        }
        let children: Vec<(Key, Observable)> = self
            .fields
            .iter()
            .filter_map(|(key, entry)| match entry {
                Entry::Value {
                    value: Value::Observable(child),
                    ..
                } => Some((key.clone(), child.clone())),
                _ => None,
            })
            .collect();

        let obs = Observable::from_target(
            self.runtime.unwrap_or_default(),
            Target::Object(self.fields),
        );
        for (key, child) in children {
            obs.forward(&key, &child);
        }
        Ok(obs)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
