//! Reactive Primitives
//!
//! This module implements the reactive core: observables, dependency
//! tracking, computed caches, notification channels, and effects.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An Observable wraps an object or array store. Reading a property inside a
//! tracked computation records the key as a dependency. Writing a property
//! notifies every watcher of that key.
//!
//! ## Computed Properties
//!
//! A computed property caches the result of its compute closure. It
//! recomputes only after one of the keys it read has been notified, and only
//! when it is read again.
//!
//! ## Notification Channels
//!
//! Every notification goes through two channels. The synchronous channel
//! runs inline and is what keeps computed caches consistent. The
//! asynchronous channel batches keys until the next microtask boundary, so
//! watchers see each changed key once per flush.
//!
//! ## Effects
//!
//! An Effect runs once immediately and again after every flush in which one
//! of the keys it last read changed.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a stack of frames owned by each observable, so
//! nested computeds track independently and separate graphs never share
//! state. The microtask queue is owned by a [`Runtime`] shared by an
//! observable and every child it wraps.

mod context;
mod effect;
mod memo;
mod observable;
mod queue;
mod runtime;
mod subscriber;

pub use effect::EffectHandle;
pub use observable::{Observable, ObservableBuilder};
pub use runtime::{FailurePolicy, NextTick, Runtime, RuntimeConfig};
pub use subscriber::{Watch, WatchTarget, WatcherId};

/// A property key. Array indices are their decimal string form.
pub type Key = String;

/// The key under which catch-all watchers are registered.
pub const WILDCARD: &str = "*";

/// Identity marker meta key.
pub const IS_OBSERVABLE: &str = "$isObservable";

/// Settle flag meta key.
pub const IS_SETTLED: &str = "$isSettled";

/// Meta names that are methods rather than readable values.
pub const META_METHODS: &[&str] = &[
    "$nextTick",
    "$notify",
    "$watch",
    "$watchSync",
    "$track",
    "$effect",
];
