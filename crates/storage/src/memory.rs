//! In-memory key-value store.
//!
//! [`MemoryStore`] implements [`KeyValueStore`] over a hash map. It is not
//! persistent and is intended for tests and for hosts that want a local
//! stand-in for a table-backed store.
//!
//! # Example
//!
//! ```
//! use tablekv_storage::{KeyValueStore, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new("sessions");
//!
//!     store.put(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = store.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    error::{StorageError, StorageResult},
    store::{KeyValueStore, StateStore},
    types::{KeyValue, PutIfAbsent},
};

/// In-memory [`KeyValueStore`].
///
/// Cloning is cheap; clones share the same data and open state.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    name: Arc<str>,
    data: Arc<RwLock<HashMap<Vec<u8>, Bytes>>>,
    open: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Creates an empty, open store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            data: Arc::new(RwLock::new(HashMap::new())),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Returns the exact number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::not_open(self.name.as_ref()))
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> StorageResult<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn persistent(&self) -> bool {
        false
    }

    fn approximate_num_entries(&self) -> u64 {
        self.len() as u64
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.ensure_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.ensure_open()?;
        self.data.write().insert(key, Bytes::from(value));
        Ok(())
    }

    async fn put_all(&self, entries: Vec<KeyValue>) -> StorageResult<()> {
        self.ensure_open()?;
        let mut data = self.data.write();
        for kv in entries {
            data.insert(kv.key.to_vec(), kv.value);
        }
        Ok(())
    }

    async fn put_if_absent(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<PutIfAbsent> {
        self.ensure_open()?;
        match self.data.write().entry(key) {
            Entry::Occupied(existing) => Ok(PutIfAbsent::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                let value = Bytes::from(value);
                slot.insert(value.clone());
                Ok(PutIfAbsent::Inserted(value))
            },
        }
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.ensure_open()?;
        Ok(self.data.write().remove(key))
    }
}
