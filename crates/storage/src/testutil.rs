//! Shared test utilities for state store testing.
//!
//! Helpers for generating keys and values, building pre-populated stores and
//! asserting on [`StorageResult`] values. Feature-gated behind `testutil` so
//! they never reach production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! tablekv-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tablekv_storage::testutil::{make_key, make_value, populated_store};
//! ```

use crate::{
    error::{StorageError, StorageResult},
    memory::MemoryStore,
    store::KeyValueStore,
};

/// Creates a deterministic key like `"prefix:000042"`.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}:{idx:06}").into_bytes()
}

/// Creates a value of `size` bytes filled with `0xAB`.
#[must_use]
pub fn make_value(size: usize) -> Vec<u8> {
    vec![0xAB; size]
}

/// Creates a value like `"task3-val42"`, identifying the writer in
/// concurrent tests.
#[must_use]
pub fn make_tagged_value(task: usize, seq: usize) -> Vec<u8> {
    format!("task{task}-val{seq}").into_bytes()
}

/// Creates a key of exactly `len` bytes whose content depends on `seed`.
///
/// Two calls with the same `len` and different seeds differ in their last
/// bytes, which is what distinguishes oversized keys sharing a long prefix.
#[must_use]
pub fn make_long_key(len: usize, seed: u32) -> Vec<u8> {
    let mut key = vec![b'k'; len];
    let tag = seed.to_be_bytes();
    let start = len.saturating_sub(tag.len());
    for (dst, src) in key[start..].iter_mut().zip(tag.iter().skip(tag.len().saturating_sub(len))) {
        *dst = *src;
    }
    key
}

/// Creates a [`MemoryStore`] holding `count` keys of `value_size` bytes.
///
/// # Panics
///
/// Panics if a `put` fails, which a fresh `MemoryStore` never does.
pub async fn populated_store(name: &str, count: usize, value_size: usize) -> MemoryStore {
    let store = MemoryStore::new(name);
    let value = make_value(value_size);
    for i in 0..count {
        store.put(make_key(name, i), value.clone()).await.expect("populate put failed");
    }
    store
}

/// Asserts that a [`StorageResult`] is `Ok`, returning the value.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tablekv_storage::{assert_storage_ok, StorageResult};
///
/// let result: StorageResult<i32> = Ok(42);
/// assert_eq!(assert_storage_ok!(result), 42);
/// ```
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Asserts that a [`StorageResult`] is a [`StorageError::Unsupported`].
#[macro_export]
macro_rules! assert_unsupported {
    ($result:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::error::StorageError::Unsupported { .. })),
            "expected StorageError::Unsupported, got: {:?}",
            result,
        );
    }};
}

/// Asserts that a [`StorageResult`] is a [`StorageError::NotOpen`].
#[macro_export]
macro_rules! assert_not_open {
    ($result:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::error::StorageError::NotOpen { .. })),
            "expected StorageError::NotOpen, got: {:?}",
            result,
        );
    }};
    ($result:expr, $msg:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::error::StorageError::NotOpen { .. })),
            "{}: expected StorageError::NotOpen, got: {:?}",
            $msg,
            result,
        );
    }};
}

/// Asserts that a [`StorageResult`] is a [`StorageError::Timeout`].
#[macro_export]
macro_rules! assert_timeout {
    ($result:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::error::StorageError::Timeout)),
            "expected StorageError::Timeout, got: {:?}",
            result,
        );
    }};
}

/// Returns `true` if the result is a transient error.
pub fn is_transient<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(err) if err.is_transient())
}

/// Returns `true` if the result is a `NotOpen` error.
pub fn is_not_open<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::NotOpen { .. }))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_make_key_format() {
        assert_eq!(make_key("test", 42), b"test:000042");
    }

    #[test]
    fn test_make_value_size() {
        assert_eq!(make_value(0).len(), 0);
        assert!(make_value(1024).iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_make_tagged_value() {
        assert_eq!(make_tagged_value(3, 42), b"task3-val42");
    }

    #[test]
    fn test_make_long_key() {
        let a = make_long_key(4096, 1);
        let b = make_long_key(4096, 2);
        assert_eq!(a.len(), 4096);
        assert_ne!(a, b);
        assert_eq!(a[..4092], b[..4092], "keys share their prefix");
        assert_eq!(make_long_key(2, 0x0102_0304), vec![0x03, 0x04]);
        assert!(make_long_key(0, 9).is_empty());
    }

    #[tokio::test]
    async fn test_populated_store() {
        let store = populated_store("item", 5, 16).await;
        for i in 0..5 {
            let val = store.get(&make_key("item", i)).await.expect("get");
            assert_eq!(val.expect("present").len(), 16);
        }
    }

    #[test]
    fn test_assert_macros() {
        let ok: StorageResult<i32> = Ok(42);
        assert_eq!(assert_storage_ok!(ok), 42);

        let unsupported: StorageResult<()> = Err(StorageError::unsupported("all"));
        assert_unsupported!(unsupported);

        let not_open: StorageResult<()> = Err(StorageError::not_open("s"));
        assert_not_open!(&not_open);
        assert!(is_not_open(&not_open));

        let timeout: StorageResult<()> = Err(StorageError::timeout());
        assert_timeout!(&timeout);
        assert!(is_transient(&timeout));
    }
}
