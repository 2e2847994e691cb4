//! Error types for observable stores.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by observable reads, writes, and compute closures.
#[derive(Debug, Error)]
pub enum Error {
    /// Only objects and arrays can back an observable.
    #[error("only objects and arrays can be made observable, got {0}")]
    NotAStore(&'static str),

    /// The key is reserved for the meta API and cannot be written.
    #[error("`{0}` is reserved for the observable meta API")]
    ReservedKey(String),

    /// The key names a meta method; call the method instead of reading it.
    #[error("`{0}` is a meta method, call it on the observable instead of reading it")]
    MetaMethod(String),

    /// The entry is read-only or computed.
    #[error("property `{0}` is read-only")]
    ReadOnly(String),

    /// An array was addressed with something other than an index or `length`.
    #[error("`{0}` is not a valid array index")]
    InvalidIndex(String),

    /// An array-only operation was used on an object store.
    #[error("operation requires an array store")]
    NotAnArray,

    /// A compute closure failed.
    #[error("computed property failed: {0}")]
    Compute(String),
}

impl Error {
    /// Build a [`Error::Compute`] from anything displayable.
    pub fn compute(message: impl std::fmt::Display) -> Self {
        Self::Compute(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_error_carries_message() {
        let err = Error::compute("division by zero");
        assert_eq!(err.to_string(), "computed property failed: division by zero");
    }

    #[test]
    fn reserved_key_names_the_key() {
        let err = Error::ReservedKey("$isObservable".into());
        assert!(err.to_string().contains("$isObservable"));
    }
}
