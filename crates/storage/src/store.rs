//! State store trait definitions.
//!
//! This module defines the two traits every store in this workspace
//! implements:
//!
//! - [`StateStore`]: the lifecycle contract a stream-processing host drives (`init`, `flush`,
//!   `close`, `is_open`, ...).
//! - [`KeyValueStore`]: the byte-oriented key-value contract (`get`, `put`, `put_all`,
//!   `put_if_absent`, `delete`).
//!
//! # Design Philosophy
//!
//! - **Keys and values are bytes**: serialization of application types happens above this layer
//! - **Async by default**: every operation may perform network I/O
//! - **Point operations only**: range scans and full iteration are rejected with
//!   [`StorageError::Unsupported`] instead of running an unscoped table scan
//!
//! Host methods that this design does not use (flushing, change logging,
//! caching toggles) have constant default implementations and never fail.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    StorageError,
    error::StorageResult,
    types::{KeyValue, PutIfAbsent},
};

/// Lifecycle contract of a named state store.
///
/// A host calls [`init`](StateStore::init) before first use and
/// [`close`](StateStore::close) exactly once when the store is retired.
/// `close` is idempotent: calls after the first are no-ops.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the logical name of the store.
    fn name(&self) -> &str;

    /// Prepares the store for use.
    ///
    /// Stores that are ready on construction keep the default no-op.
    async fn init(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Flushes buffered writes. Writes are never buffered here, so this is a no-op.
    async fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Closes the store and releases any shared resources it holds.
    async fn close(&self) -> StorageResult<()>;

    /// Returns `true` while the store accepts operations.
    fn is_open(&self) -> bool;

    /// Returns `true` if data survives a process restart.
    fn persistent(&self) -> bool;

    /// Returns an estimate of the number of entries.
    ///
    /// Remote tables do not expose a cheap exact count; the default reports
    /// `u64::MAX`, meaning "unknown".
    fn approximate_num_entries(&self) -> u64 {
        u64::MAX
    }

    /// Returns whether the host should keep a change log for this store.
    fn logging_enabled(&self) -> bool {
        false
    }

    /// Returns whether the host should put a cache in front of this store.
    fn caching_enabled(&self) -> bool {
        false
    }
}

/// Byte-oriented key-value operations.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](KeyValueStore::get) | Retrieve a single value by key |
/// | [`put`](KeyValueStore::put) | Unconditionally store a key-value pair |
/// | [`put_all`](KeyValueStore::put_all) | Store many pairs; last occurrence of a key wins |
/// | [`put_if_absent`](KeyValueStore::put_if_absent) | Insert only when no value exists |
/// | [`delete`](KeyValueStore::delete) | Remove a key, returning its previous value |
/// | [`range`](KeyValueStore::range) / [`all`](KeyValueStore::all) | Unsupported |
#[async_trait]
pub trait KeyValueStore: StateStore {
    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` if the key has no value. A stored empty value is
    /// returned as `Ok(Some(Bytes::new()))`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair, overwriting any previous value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Stores every entry.
    ///
    /// If a key occurs more than once, the value of its last occurrence is
    /// the one stored. The call is not atomic: on error, some entries may
    /// already have been written.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn put_all(&self, entries: Vec<KeyValue>) -> StorageResult<()>;

    /// Inserts `value` only if `key` has no value, atomically.
    ///
    /// Returns the value stored for `key` once the call completes: the
    /// supplied value when this call inserted it, or the value another
    /// writer committed first. Concurrent callers racing on the same key
    /// all observe the same winning value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn put_if_absent(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<PutIfAbsent>;

    /// Deletes a key, returning the value it held immediately before, if any.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Range scans are not supported.
    ///
    /// # Errors
    ///
    /// Always returns [`StorageError::Unsupported`] without touching the backend.
    async fn range(&self, _from: &[u8], _to: &[u8]) -> StorageResult<Vec<KeyValue>> {
        Err(StorageError::unsupported(format!("{}.range", self.name())))
    }

    /// Full iteration is not supported.
    ///
    /// # Errors
    ///
    /// Always returns [`StorageError::Unsupported`] without touching the backend.
    async fn all(&self) -> StorageResult<Vec<KeyValue>> {
        Err(StorageError::unsupported(format!("{}.all", self.name())))
    }
}
