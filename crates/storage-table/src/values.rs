//! Record encoding.
//!
//! A logical entry `(store, key, value)` is one item in the physical table:
//!
//! | Attribute | Type | Content |
//! |-----------|------|---------|
//! | hash key column | binary | `0x00` followed by the (normalized) key |
//! | sort key column | string | the store name |
//! | value column | binary or null | the value; null when it is empty |
//!
//! The service rejects empty binaries, including empty key attributes, so
//! the partition key carries a one-byte tag and an empty value is written as
//! the null attribute. Reads decode null back to an empty value, keeping
//! "present and empty" distinct from "absent".

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tablekv_storage::{StorageError, StorageResult};

use crate::{
    client::{AttributeValue, Item},
    config::TableSettings,
};

/// Tag byte that prefixes every encoded partition key.
pub const KEY_TAG: u8 = 0x00;

/// Encodes `key` as a partition key attribute payload.
#[must_use]
pub fn encode_key(key: &[u8]) -> Bytes {
    let mut encoded = BytesMut::with_capacity(key.len() + 1);
    encoded.put_u8(KEY_TAG);
    encoded.put_slice(key);
    encoded.freeze()
}

/// Encodes a value as an attribute: binary when non-empty, null otherwise.
#[must_use]
pub fn encode_value(value: Bytes) -> AttributeValue {
    if value.is_empty() { AttributeValue::Null } else { AttributeValue::B(value) }
}

/// Decodes a value attribute.
///
/// # Errors
///
/// Returns [`StorageError::Serialization`] for a string attribute.
pub fn decode_value(attribute: &AttributeValue) -> StorageResult<Bytes> {
    match attribute {
        AttributeValue::B(bytes) => Ok(bytes.clone()),
        AttributeValue::Null => Ok(Bytes::new()),
        AttributeValue::S(_) => {
            Err(StorageError::serialization("value attribute holds a string, expected binary"))
        },
    }
}

/// Builds items for one logical store.
#[derive(Debug, Clone)]
pub(crate) struct RecordCodec {
    settings: Arc<TableSettings>,
    store: String,
}

impl RecordCodec {
    pub(crate) fn new(settings: Arc<TableSettings>, store: impl Into<String>) -> Self {
        Self { settings, store: store.into() }
    }

    pub(crate) fn table(&self) -> &str {
        self.settings.table()
    }

    /// Primary key item for `key`.
    pub(crate) fn key_item(&self, key: &[u8]) -> Item {
        let mut item = Item::with_capacity(2);
        item.insert(self.settings.hash_key_column().to_owned(), AttributeValue::B(encode_key(key)));
        item.insert(self.settings.sort_key_column().to_owned(), AttributeValue::S(self.store.clone()));
        item
    }

    /// Full record item for `key` and `value`.
    pub(crate) fn record_item(&self, key: &[u8], value: Bytes) -> Item {
        let mut item = self.key_item(key);
        item.insert(self.settings.value_column().to_owned(), encode_value(value));
        item
    }

    /// Extracts the value from a stored record.
    pub(crate) fn decode_record(&self, item: &Item) -> StorageResult<Bytes> {
        match item.get(self.settings.value_column()) {
            Some(attribute) => decode_value(attribute),
            None => Err(StorageError::serialization(format!(
                "record in store '{}' has no '{}' attribute",
                self.store,
                self.settings.value_column()
            ))),
        }
    }

    /// Name of the sort key column, the attribute a conditional insert tests.
    pub(crate) fn sort_key_column(&self) -> &str {
        self.settings.sort_key_column()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn codec() -> RecordCodec {
        RecordCodec::new(Arc::new(TableSettings::builder().table("kv").build().unwrap()), "counts")
    }

    #[test]
    fn test_empty_key_is_tagged() {
        assert_eq!(encode_key(b"").as_ref(), &[KEY_TAG]);
        assert_eq!(encode_key(b"ab").as_ref(), &[KEY_TAG, b'a', b'b']);
    }

    #[test]
    fn test_empty_value_is_null() {
        assert_eq!(encode_value(Bytes::new()), AttributeValue::Null);
        assert_eq!(decode_value(&AttributeValue::Null).unwrap(), Bytes::new());
    }

    #[test]
    fn test_string_value_is_rejected() {
        let err = decode_value(&AttributeValue::S("oops".into())).unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }

    #[test]
    fn test_record_layout() {
        let item = codec().record_item(b"k", Bytes::from_static(b"v"));
        assert_eq!(item.len(), 3);
        assert_eq!(item["key"], AttributeValue::B(Bytes::from_static(b"\x00k")));
        assert_eq!(item["type"], AttributeValue::S("counts".into()));
        assert_eq!(item["value"], AttributeValue::B(Bytes::from_static(b"v")));
    }

    #[test]
    fn test_missing_value_attribute() {
        let codec = codec();
        let err = codec.decode_record(&codec.key_item(b"k")).unwrap_err();
        assert!(err.to_string().contains("value"), "{err}");
    }

    proptest! {
        /// Encoded keys are never empty and preserve the original bytes.
        #[test]
        fn encoded_key_is_tagged(key in proptest::collection::vec(any::<u8>(), 0..256)) {
            let encoded = encode_key(&key);
            prop_assert_eq!(encoded.len(), key.len() + 1);
            prop_assert_eq!(encoded[0], KEY_TAG);
            prop_assert_eq!(&encoded[1..], key.as_slice());
        }
    }
}
