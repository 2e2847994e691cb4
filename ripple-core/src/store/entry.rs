//! Store entries and property definitions.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::reactive::Observable;
use crate::value::Value;

/// Compute closure of a computed property.
///
/// The closure receives the observable that owns the property, so reads made
/// through it are tracked as dependencies of the property.
pub type ComputeFn = Arc<dyn Fn(&Observable) -> Result<Value> + Send + Sync>;

/// A single property slot in a store.
#[derive(Clone)]
pub(crate) enum Entry {
    /// A stored value.
    Value { value: Value, writable: bool },

    /// A derived value, cached by the observable's computed cache.
    Computed(ComputeFn),
}

impl Entry {
    /// A writable stored value.
    pub(crate) fn writable(value: Value) -> Self {
        Entry::Value {
            value,
            writable: true,
        }
    }

    /// Whether a plain `set` may replace this entry.
    pub(crate) fn is_writable(&self) -> bool {
        matches!(self, Entry::Value { writable: true, .. })
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Value { value, writable } => f
                .debug_struct("Value")
                .field("value", value)
                .field("writable", writable)
                .finish(),
            Entry::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// How a property is defined with [`Observable::define`].
#[derive(Clone)]
pub enum Definition {
    /// A writable stored value.
    Value(Value),

    /// A stored value that rejects writes and is never wrapped on read.
    ReadOnly(Value),

    /// A computed property.
    Computed(ComputeFn),
}

impl Definition {
    pub fn value(value: impl Into<Value>) -> Self {
        Definition::Value(value.into())
    }

    pub fn read_only(value: impl Into<Value>) -> Self {
        Definition::ReadOnly(value.into())
    }

    /// A computed property backed by `compute`.
    pub fn computed<F>(compute: F) -> Self
    where
        F: Fn(&Observable) -> Result<Value> + Send + Sync + 'static,
    {
        Definition::Computed(Arc::new(compute))
    }

    pub(crate) fn into_entry(self) -> Entry {
        match self {
            Definition::Value(value) => Entry::writable(value),
            Definition::ReadOnly(value) => Entry::Value {
                value,
                writable: false,
            },
            Definition::Computed(compute) => Entry::Computed(compute),
        }
    }

    /// The stored value this definition carries, if any.
    pub(crate) fn stored_value(&self) -> Option<&Value> {
        match self {
            Definition::Value(value) | Definition::ReadOnly(value) => Some(value),
            Definition::Computed(_) => None,
        }
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Definition::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Definition::ReadOnly(value) => f.debug_tuple("ReadOnly").field(value).finish(),
            Definition::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_map_to_entry_kinds() {
        assert!(Definition::value(1).into_entry().is_writable());
        assert!(!Definition::read_only(1).into_entry().is_writable());

        let computed = Definition::computed(|_| Ok(Value::from(2)));
        assert!(computed.stored_value().is_none());
        assert!(matches!(computed.into_entry(), Entry::Computed(_)));
    }
}
