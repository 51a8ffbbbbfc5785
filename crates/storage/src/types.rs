//! Common types used across store operations.

use bytes::Bytes;

/// A key-value pair, used as the input of bulk writes.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use tablekv_storage::KeyValue;
///
/// let kv = KeyValue {
///     key: Bytes::from("user:123"),
///     value: Bytes::from(r#"{"clicks":4}"#),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    ///
    /// # Examples
    ///
    /// ```
    /// use tablekv_storage::KeyValue;
    ///
    /// let kv = KeyValue::new("key", "value");
    /// assert_eq!(kv.key.as_ref(), b"key");
    /// ```
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Outcome of a put-if-absent call.
///
/// Both variants carry the value that is stored for the key once the call
/// returns: the caller's own value if it won the insert, otherwise the value
/// some other writer committed first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutIfAbsent {
    /// No record existed; the supplied value was inserted.
    Inserted(Bytes),
    /// A record already existed; it holds this value and was left untouched.
    Existing(Bytes),
}

impl PutIfAbsent {
    /// Returns the value stored for the key after the call.
    #[must_use]
    pub fn value(&self) -> &Bytes {
        match self {
            Self::Inserted(value) | Self::Existing(value) => value,
        }
    }

    /// Consumes the outcome, returning the stored value.
    #[must_use]
    pub fn into_value(self) -> Bytes {
        match self {
            Self::Inserted(value) | Self::Existing(value) => value,
        }
    }

    /// Returns `true` if this call inserted the value.
    #[must_use]
    pub fn was_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_if_absent_accessors() {
        let inserted = PutIfAbsent::Inserted(Bytes::from("mine"));
        assert!(inserted.was_inserted());
        assert_eq!(inserted.value(), &Bytes::from("mine"));

        let existing = PutIfAbsent::Existing(Bytes::from("theirs"));
        assert!(!existing.was_inserted());
        assert_eq!(existing.into_value(), Bytes::from("theirs"));
    }
}
