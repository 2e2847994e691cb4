//! Ripple Core
//!
//! This crate provides observable stores for small state-management layers.
//! It implements:
//!
//! - Observable object and array stores with transparent property access
//! - Automatic dependency tracking of property reads
//! - Lazily cached computed properties with exact-dependency invalidation
//! - Batched change notification flushed once per microtask boundary
//! - Effects that re-run once per flush in which their dependencies changed
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: observables, tracking, caching, notification, and effects
//! - `store`: the explicit field model behind an observable
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{Definition, Observable, Value};
//! use serde_json::json;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let state = Observable::new(json!({ "foo": 0 })).unwrap();
//! state
//!     .define(
//!         "doubled",
//!         Definition::computed(|obs| {
//!             Ok(Value::from(obs.get("foo")?.as_i64().unwrap_or(0) * 2))
//!         }),
//!     )
//!     .unwrap();
//!
//! let fired = Arc::new(AtomicUsize::new(0));
//! let counter = fired.clone();
//! state.watch("doubled", move |_| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! assert_eq!(state.get("doubled").unwrap(), Value::from(0));
//! state.set("foo", 4).unwrap();
//! state.set("foo", 5).unwrap();
//! state.tick();
//!
//! assert_eq!(state.get("doubled").unwrap(), Value::from(10));
//! assert_eq!(fired.load(Ordering::SeqCst), 1);
//! ```

pub mod error;
pub mod reactive;
pub mod store;
pub mod value;

pub use error::{Error, Result};
pub use reactive::{
    EffectHandle, FailurePolicy, NextTick, Observable, ObservableBuilder, Runtime, RuntimeConfig,
    Watch, WatchTarget, WatcherId,
};
pub use store::{ComputeFn, Definition};
pub use value::Value;
