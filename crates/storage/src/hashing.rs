//! Oversized-key normalization.
//!
//! Table backends cap the size of key attributes. [`KeyCodec`] maps every
//! caller key onto a key that fits: keys up to the threshold pass through
//! unchanged, longer keys are replaced by their SHA-512 digest (64 bytes).
//! Distinct oversized keys collide only with digest-collision probability.
//!
//! [`HashingStore`] applies the codec in front of another
//! [`KeyValueStore`], intercepting exactly the key-bearing operations and
//! forwarding everything else unchanged.

use std::borrow::Cow;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha512};

use crate::{
    error::{ConfigError, StorageResult},
    store::{KeyValueStore, StateStore},
    types::{KeyValue, PutIfAbsent},
};

/// Default normalization threshold in bytes.
///
/// Table partition keys are limited to 2048 bytes and the key encoding adds
/// one tag byte, leaving 2047 bytes for the caller's key.
pub const DEFAULT_KEY_HASH_THRESHOLD: usize = 2047;

/// Length of a normalized oversized key (SHA-512 output).
pub const HASHED_KEY_LEN: usize = 64;

/// Deterministic key normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCodec {
    threshold: usize,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self { threshold: DEFAULT_KEY_HASH_THRESHOLD }
    }
}

impl KeyCodec {
    /// Creates a codec that hashes keys longer than `threshold` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `threshold` is smaller than
    /// [`HASHED_KEY_LEN`]: a digest must itself pass through unchanged.
    pub fn new(threshold: usize) -> Result<Self, ConfigError> {
        if threshold < HASHED_KEY_LEN {
            return Err(ConfigError::BelowMinimum {
                field: "key_hash_threshold",
                min: HASHED_KEY_LEN.to_string(),
                value: threshold.to_string(),
            });
        }
        Ok(Self { threshold })
    }

    /// Returns the threshold in bytes.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Maps `key` to a key no longer than the threshold.
    ///
    /// # Examples
    ///
    /// ```
    /// use tablekv_storage::KeyCodec;
    ///
    /// let codec = KeyCodec::default();
    /// assert_eq!(codec.normalize(b"short").as_ref(), b"short");
    /// assert_eq!(codec.normalize(&[7u8; 4096]).len(), 64);
    /// ```
    #[must_use]
    pub fn normalize<'a>(&self, key: &'a [u8]) -> Cow<'a, [u8]> {
        if self.is_oversized(key) {
            Cow::Owned(Sha512::digest(key).to_vec())
        } else {
            Cow::Borrowed(key)
        }
    }

    fn normalize_owned(&self, key: Vec<u8>) -> Vec<u8> {
        if self.is_oversized(&key) { Sha512::digest(&key).to_vec() } else { key }
    }

    fn is_oversized(&self, key: &[u8]) -> bool {
        key.len() > self.threshold
    }
}

/// A [`KeyValueStore`] that normalizes keys before delegating to `S`.
#[derive(Debug)]
pub struct HashingStore<S> {
    inner: S,
    codec: KeyCodec,
}

impl<S: KeyValueStore> HashingStore<S> {
    /// Wraps `inner`, normalizing keys with `codec`.
    pub fn new(inner: S, codec: KeyCodec) -> Self {
        Self { inner, codec }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns the codec in use.
    #[must_use]
    pub fn codec(&self) -> KeyCodec {
        self.codec
    }

    /// Unwraps the inner store.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: KeyValueStore> StateStore for HashingStore<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn init(&self) -> StorageResult<()> {
        self.inner.init().await
    }

    async fn flush(&self) -> StorageResult<()> {
        self.inner.flush().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn persistent(&self) -> bool {
        self.inner.persistent()
    }

    fn approximate_num_entries(&self) -> u64 {
        self.inner.approximate_num_entries()
    }

    fn logging_enabled(&self) -> bool {
        self.inner.logging_enabled()
    }

    fn caching_enabled(&self) -> bool {
        self.inner.caching_enabled()
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for HashingStore<S> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.inner.get(&self.codec.normalize(key)).await
    }

    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.inner.put(self.codec.normalize_owned(key), value).await
    }

    async fn put_all(&self, entries: Vec<KeyValue>) -> StorageResult<()> {
        let entries = entries
            .into_iter()
            .map(|kv| {
                if self.codec.is_oversized(&kv.key) {
                    KeyValue { key: Bytes::from(Sha512::digest(&kv.key).to_vec()), value: kv.value }
                } else {
                    kv
                }
            })
            .collect();
        self.inner.put_all(entries).await
    }

    async fn put_if_absent(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<PutIfAbsent> {
        self.inner.put_if_absent(self.codec.normalize_owned(key), value).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.inner.delete(&self.codec.normalize(key)).await
    }

    async fn range(&self, from: &[u8], to: &[u8]) -> StorageResult<Vec<KeyValue>> {
        self.inner.range(from, to).await
    }

    async fn all(&self) -> StorageResult<Vec<KeyValue>> {
        self.inner.all().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::empty(0, false)]
    #[case::one_byte(1, false)]
    #[case::at_threshold(DEFAULT_KEY_HASH_THRESHOLD, false)]
    #[case::one_over(DEFAULT_KEY_HASH_THRESHOLD + 1, true)]
    #[case::far_over(64 * 1024, true)]
    fn normalize_boundaries(#[case] len: usize, #[case] hashed: bool) {
        let codec = KeyCodec::default();
        let key = vec![0x5A; len];
        let normalized = codec.normalize(&key);

        if hashed {
            assert_eq!(normalized.len(), HASHED_KEY_LEN);
            assert!(matches!(normalized, Cow::Owned(_)));
        } else {
            assert_eq!(normalized.as_ref(), key.as_slice());
            assert!(matches!(normalized, Cow::Borrowed(_)));
        }
    }

    #[test]
    fn owned_and_borrowed_paths_agree() {
        let codec = KeyCodec::new(100).unwrap();
        for len in [0, 99, 100, 101, 500] {
            let key = vec![3u8; len];
            assert_eq!(codec.normalize(&key).into_owned(), codec.normalize_owned(key.clone()));
        }
    }

    #[test]
    fn digest_is_sha512() {
        let codec = KeyCodec::new(HASHED_KEY_LEN).unwrap();
        let key = vec![b'a'; HASHED_KEY_LEN + 1];
        let expected = Sha512::digest(&key);
        assert_eq!(hex::encode(codec.normalize(&key)), hex::encode(expected));
    }

    #[test]
    fn threshold_below_digest_len_rejected() {
        let err = KeyCodec::new(HASHED_KEY_LEN - 1).unwrap_err();
        assert!(err.to_string().contains("key_hash_threshold"), "error should name the field: {err}");
    }

    proptest! {
        /// Keys at or below the threshold are returned unchanged.
        #[test]
        fn short_keys_are_identity(key in proptest::collection::vec(any::<u8>(), 0..=128)) {
            let codec = KeyCodec::new(128).unwrap();
            let normalized = codec.normalize(&key);
            prop_assert_eq!(normalized.as_ref(), key.as_slice());
        }

        /// Normalization is deterministic.
        #[test]
        fn normalization_is_deterministic(key in proptest::collection::vec(any::<u8>(), 0..512)) {
            let codec = KeyCodec::new(128).unwrap();
            prop_assert_eq!(codec.normalize(&key), codec.normalize(&key));
        }

        /// Distinct oversized keys map to distinct digests.
        #[test]
        fn distinct_long_keys_stay_distinct(
            a in proptest::collection::vec(any::<u8>(), 129..400),
            b in proptest::collection::vec(any::<u8>(), 129..400),
        ) {
            prop_assume!(a != b);
            let codec = KeyCodec::new(128).unwrap();
            prop_assert_ne!(codec.normalize(&a), codec.normalize(&b));
        }
    }
}
