//! Store Model
//!
//! The data behind an observable: either an ordered object map or an array,
//! holding one [`Entry`] per property.
//!
//! Entry kinds are fixed when a property is defined. A property is either a
//! stored value (writable or read-only) or a computed field carrying its
//! compute closure, so the observable never has to inspect a property to
//! learn how it behaves.
//!
//! Nested plain objects and arrays live here as raw data until the first
//! read wraps them into child observables. The wrapped child then replaces
//! the raw data in place. Parents own their children; children only keep a
//! weak back-reference for notification routing (see `reactive::observable`).

mod entry;
mod target;

pub use entry::{ComputeFn, Definition};
pub(crate) use entry::Entry;
pub(crate) use target::{Target, LENGTH};
