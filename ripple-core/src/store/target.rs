//! Object and array targets.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use super::entry::Entry;
use crate::error::{Error, Result};
use crate::value::Value;

/// The length pseudo-property of array targets.
pub(crate) const LENGTH: &str = "length";

/// Largest array length. Indices run below it.
pub(crate) const MAX_LENGTH: usize = u32::MAX as usize;

/// The raw storage behind an observable.
#[derive(Debug)]
pub(crate) enum Target {
    Object(IndexMap<String, Entry>),
    Array(Vec<Entry>),
}

/// An array key after parsing.
enum Slot {
    Index(usize),
    Length,
}

/// Parse an array key. Only canonical decimal indices below
/// [`MAX_LENGTH`] are accepted, so `"01"` and `"+1"` are not indices.
fn parse_slot(key: &str) -> Option<Slot> {
    if key == LENGTH {
        return Some(Slot::Length);
    }
    let index: usize = key.parse().ok()?;
    (index < MAX_LENGTH && index.to_string() == key).then_some(Slot::Index(index))
}

/// Resize `items` to `length`, failing instead of aborting when the
/// allocation cannot be made.
fn resize(items: &mut Vec<Entry>, length: usize, key: &str) -> Result<()> {
    if length > items.len() {
        items
            .try_reserve_exact(length - items.len())
            .map_err(|_| Error::InvalidIndex(key.to_owned()))?;
    }
    items.resize(length, Entry::writable(Value::Undefined));
    Ok(())
}

impl Target {
    /// Build a target from plain object or array data.
    pub(crate) fn from_json(json: JsonValue) -> Result<Self> {
        match json {
            JsonValue::Object(map) => Ok(Target::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Entry::writable(Value::Data(value))))
                    .collect(),
            )),
            JsonValue::Array(items) => Ok(Target::Array(
                items
                    .into_iter()
                    .map(|value| Entry::writable(Value::Data(value)))
                    .collect(),
            )),
            JsonValue::Null => Err(Error::NotAStore("null")),
            JsonValue::Bool(_) => Err(Error::NotAStore("a boolean")),
            JsonValue::Number(_) => Err(Error::NotAStore("a number")),
            JsonValue::String(_) => Err(Error::NotAStore("a string")),
        }
    }

    pub(crate) fn is_array(&self) -> bool {
        matches!(self, Target::Array(_))
    }

    /// Look up the entry for `key`.
    ///
    /// Array `length` is synthesized as a writable numeric entry. Unknown
    /// keys, array holes past the end, and non-index keys on arrays are
    /// reported as missing.
    pub(crate) fn get(&self, key: &str) -> Option<Entry> {
        match self {
            Target::Object(map) => map.get(key).cloned(),
            Target::Array(items) => match parse_slot(key)? {
                Slot::Index(index) => items.get(index).cloned(),
                Slot::Length => Some(Entry::writable(Value::from(items.len() as u64))),
            },
        }
    }

    /// Store `entry` under `key`, extending arrays with holes as needed.
    pub(crate) fn put(&mut self, key: &str, entry: Entry) -> Result<()> {
        match self {
            Target::Object(map) => {
                map.insert(key.to_owned(), entry);
                Ok(())
            }
            Target::Array(items) => match parse_slot(key) {
                Some(Slot::Index(index)) => {
                    if index >= items.len() {
                        let length = index
                            .checked_add(1)
                            .ok_or_else(|| Error::InvalidIndex(key.to_owned()))?;
                        resize(items, length, key)?;
                    }
                    items[index] = entry;
                    Ok(())
                }
                Some(Slot::Length) => {
                    let length = match &entry {
                        Entry::Value { value, .. } => value.as_json().and_then(JsonValue::as_u64),
                        Entry::Computed(_) => None,
                    };
                    let length = length
                        .and_then(|length| usize::try_from(length).ok())
                        .filter(|length| *length <= MAX_LENGTH)
                        .ok_or_else(|| Error::InvalidIndex(LENGTH.to_owned()))?;
                    resize(items, length, LENGTH)
                }
                None => Err(Error::InvalidIndex(key.to_owned())),
            },
        }
    }

    /// Remove `key`. Array elements become holes instead of shifting.
    ///
    /// Returns whether a property existed.
    pub(crate) fn remove(&mut self, key: &str) -> Result<bool> {
        match self {
            Target::Object(map) => Ok(map.shift_remove(key).is_some()),
            Target::Array(items) => match parse_slot(key) {
                Some(Slot::Index(index)) => match items.get_mut(index) {
                    Some(slot) => {
                        *slot = Entry::writable(Value::Undefined);
                        Ok(true)
                    }
                    None => Ok(false),
                },
                Some(Slot::Length) => Err(Error::ReadOnly(LENGTH.to_owned())),
                None => Err(Error::InvalidIndex(key.to_owned())),
            },
        }
    }

    /// Property keys in storage order (indices for arrays).
    pub(crate) fn keys(&self) -> Vec<String> {
        match self {
            Target::Object(map) => map.keys().cloned().collect(),
            Target::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Target::Object(map) => map.len(),
            Target::Array(items) => items.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(entry: Option<Entry>) -> Value {
        match entry {
            Some(Entry::Value { value, .. }) => value,
            _ => Value::Undefined,
        }
    }

    #[test]
    fn rejects_scalar_stores() {
        assert!(matches!(Target::from_json(json!(3)), Err(Error::NotAStore("a number"))));
        assert!(matches!(Target::from_json(json!(null)), Err(Error::NotAStore("null"))));
    }

    #[test]
    fn object_keeps_insertion_order() {
        let mut target = Target::from_json(json!({"b": 1, "a": 2})).unwrap();
        target.put("c", Entry::writable(Value::from(3))).unwrap();
        assert_eq!(target.keys(), vec!["b", "a", "c"]);

        assert!(target.remove("a").unwrap());
        assert!(!target.remove("a").unwrap());
        assert_eq!(target.keys(), vec!["b", "c"]);
    }

    #[test]
    fn array_writes_past_end_leave_holes() {
        let mut target = Target::from_json(json!([1])).unwrap();
        target.put("3", Entry::writable(Value::from(4))).unwrap();

        assert_eq!(target.len(), 4);
        assert!(stored(target.get("1")).is_undefined());
        assert_eq!(stored(target.get("3")), Value::from(4));
        assert_eq!(stored(target.get("length")), Value::from(4u64));
    }

    #[test]
    fn array_length_truncates() {
        let mut target = Target::from_json(json!([1, 2, 3])).unwrap();
        target.put("length", Entry::writable(Value::from(1u64))).unwrap();
        assert_eq!(target.len(), 1);
        assert!(target.get("1").is_none());
    }

    #[test]
    fn array_rejects_non_index_keys() {
        let mut target = Target::from_json(json!([])).unwrap();
        assert!(matches!(
            target.put("01", Entry::writable(Value::from(1))),
            Err(Error::InvalidIndex(_))
        ));
        assert!(matches!(
            target.put("name", Entry::writable(Value::from(1))),
            Err(Error::InvalidIndex(_))
        ));
        assert!(target.get("name").is_none());
    }

    #[test]
    fn array_rejects_out_of_range_indices() {
        let mut target = Target::from_json(json!([1])).unwrap();
        for key in [usize::MAX.to_string(), MAX_LENGTH.to_string()] {
            assert!(matches!(
                target.put(&key, Entry::writable(Value::from(1))),
                Err(Error::InvalidIndex(_))
            ));
            assert!(target.get(&key).is_none());
        }
        assert!(matches!(
            target.put("length", Entry::writable(Value::from(MAX_LENGTH as u64 + 1))),
            Err(Error::InvalidIndex(_))
        ));
        assert!(matches!(
            target.put("length", Entry::writable(Value::from(u64::MAX))),
            Err(Error::InvalidIndex(_))
        ));
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn array_delete_leaves_hole() {
        let mut target = Target::from_json(json!([1, 2])).unwrap();
        assert!(target.remove("0").unwrap());
        assert_eq!(target.len(), 2);
        assert!(stored(target.get("0")).is_undefined());
    }
}
