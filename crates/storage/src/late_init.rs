//! Stores whose backing connection is opened by the host's `init` call.
//!
//! A stream-processing host usually builds its stores while assembling a
//! topology and initializes them later, on the thread that will use them.
//! [`LateInitStore`] defers the expensive part (acquiring a shared client
//! lease, provisioning) to [`StateStore::init`]. Before `init` and after
//! `close`, every key-value operation fails with [`StorageError::NotOpen`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::{StorageError, StorageResult},
    store::{KeyValueStore, StateStore},
    types::{KeyValue, PutIfAbsent},
};

/// Opens the delegate of a [`LateInitStore`].
#[async_trait]
pub trait StoreOpener: Send + Sync {
    /// Store type produced by [`open`](StoreOpener::open).
    type Store: KeyValueStore + 'static;

    /// Opens the store called `name`.
    async fn open(&self, name: &str) -> StorageResult<Self::Store>;

    /// Whether stores from this opener survive a process restart.
    fn persistent(&self) -> bool {
        true
    }
}

enum Slot<S> {
    Pending,
    Open(Arc<S>),
    Closed,
}

/// A [`KeyValueStore`] that opens its delegate on [`init`](StateStore::init).
pub struct LateInitStore<O: StoreOpener> {
    name: String,
    opener: O,
    slot: RwLock<Slot<O::Store>>,
    // Serializes init and close; never held by key-value operations.
    transition: Mutex<()>,
}

impl<O: StoreOpener> LateInitStore<O> {
    /// Creates an uninitialized store named `name`.
    pub fn new(name: impl Into<String>, opener: O) -> Self {
        Self { name: name.into(), opener, slot: RwLock::new(Slot::Pending), transition: Mutex::new(()) }
    }

    /// Returns the opener.
    pub fn opener(&self) -> &O {
        &self.opener
    }

    fn delegate(&self) -> StorageResult<Arc<O::Store>> {
        match &*self.slot.read() {
            Slot::Open(store) => Ok(Arc::clone(store)),
            Slot::Pending | Slot::Closed => Err(StorageError::not_open(&self.name)),
        }
    }
}

impl<O: StoreOpener> std::fmt::Debug for LateInitStore<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.slot.read() {
            Slot::Pending => "pending",
            Slot::Open(_) => "open",
            Slot::Closed => "closed",
        };
        f.debug_struct("LateInitStore").field("name", &self.name).field("state", &state).finish()
    }
}

#[async_trait]
impl<O: StoreOpener> StateStore for LateInitStore<O> {
    fn name(&self) -> &str {
        &self.name
    }

    /// Opens and initializes the delegate. Calling `init` on an open store
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotOpen`] if the store was already closed, or
    /// the opener's error.
    async fn init(&self) -> StorageResult<()> {
        let _transition = self.transition.lock().await;
        match &*self.slot.read() {
            Slot::Open(_) => return Ok(()),
            Slot::Closed => return Err(StorageError::not_open(&self.name)),
            Slot::Pending => {},
        }

        debug!(store = %self.name, "Opening late-initialized store");
        let store = self.opener.open(&self.name).await?;
        store.init().await?;
        *self.slot.write() = Slot::Open(Arc::new(store));
        Ok(())
    }

    async fn flush(&self) -> StorageResult<()> {
        match self.delegate() {
            Ok(store) => store.flush().await,
            Err(_) => Ok(()),
        }
    }

    /// Closes the delegate if it was opened. Later calls are no-ops.
    async fn close(&self) -> StorageResult<()> {
        let _transition = self.transition.lock().await;
        let previous = std::mem::replace(&mut *self.slot.write(), Slot::Closed);
        match previous {
            Slot::Open(store) => {
                debug!(store = %self.name, "Closing late-initialized store");
                store.close().await
            },
            Slot::Pending | Slot::Closed => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        matches!(&*self.slot.read(), Slot::Open(_))
    }

    fn persistent(&self) -> bool {
        self.opener.persistent()
    }

    fn approximate_num_entries(&self) -> u64 {
        self.delegate().map_or(u64::MAX, |store| store.approximate_num_entries())
    }
}

#[async_trait]
impl<O: StoreOpener> KeyValueStore for LateInitStore<O> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.delegate()?.get(key).await
    }

    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.delegate()?.put(key, value).await
    }

    async fn put_all(&self, entries: Vec<KeyValue>) -> StorageResult<()> {
        self.delegate()?.put_all(entries).await
    }

    async fn put_if_absent(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<PutIfAbsent> {
        self.delegate()?.put_if_absent(key, value).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.delegate()?.delete(key).await
    }
}
