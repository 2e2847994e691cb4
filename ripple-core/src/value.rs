//! Values stored in and read from observables.
//!
//! Plain data is carried as [`serde_json::Value`]. Nested objects and arrays
//! become [`Observable`] children the first time they are read, so a read can
//! hand back either plain data or a reactive child.

use std::fmt;

use serde_json::Value as JsonValue;

use crate::reactive::Observable;

/// A property value.
#[derive(Clone, Default)]
pub enum Value {
    /// No value (unset key, array hole, or explicitly undefined).
    #[default]
    Undefined,

    /// Plain data.
    Data(JsonValue),

    /// A reactive child store.
    Observable(Observable),
}

impl Value {
    /// Whether this value is [`Value::Undefined`].
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Whether this value is an observable.
    pub fn is_observable(&self) -> bool {
        matches!(self, Value::Observable(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Data(json) => json.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Data(json) => json.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Data(json) => json.as_bool(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Data(json) => json.as_str(),
            _ => None,
        }
    }

    /// Borrow the observable child, if this is one.
    pub fn as_observable(&self) -> Option<&Observable> {
        match self {
            Value::Observable(obs) => Some(obs),
            _ => None,
        }
    }

    /// Borrow the plain data, if this is plain data.
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Value::Data(json) => Some(json),
            _ => None,
        }
    }

    /// Whether this is plain object or array data (a wrap candidate).
    pub(crate) fn is_plain_store(&self) -> bool {
        matches!(self, Value::Data(JsonValue::Object(_) | JsonValue::Array(_)))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::Observable(a), Value::Observable(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Data(json) => write!(f, "Data({json})"),
            Value::Observable(obs) => fmt::Debug::fmt(obs, f),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        Value::Data(json)
    }
}

impl From<Observable> for Value {
    fn from(obs: Observable) -> Self {
        Value::Observable(obs)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Undefined)
    }
}

macro_rules! impl_from_json {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Data(JsonValue::from(value))
                }
            }
        )*
    };
}

impl_from_json!(bool, i32, i64, u32, u64, f64, &str, String);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_accessors() {
        assert_eq!(Value::from(5).as_i64(), Some(5));
        assert_eq!(Value::from(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::Undefined.as_i64(), None);
    }

    #[test]
    fn undefined_is_distinct_from_null() {
        assert_ne!(Value::Undefined, Value::Data(JsonValue::Null));
        assert!(Value::from(None::<i64>).is_undefined());
    }

    #[test]
    fn plain_store_detection() {
        assert!(Value::from(json!({"a": 1})).is_plain_store());
        assert!(Value::from(json!([1, 2])).is_plain_store());
        assert!(!Value::from(json!(3)).is_plain_store());
        assert!(!Value::Undefined.is_plain_store());
    }
}
