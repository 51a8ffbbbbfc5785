//! The table-backed key-value store.
//!
//! A [`TableStore`] is one logical store inside a shared physical table: its
//! name is the sort key of every record it writes. It holds one lease on the
//! shared table client for its whole lifetime and releases it on `close`.
//!
//! Keys reach this layer already normalized (see
//! [`HashingStore`](tablekv_storage::HashingStore)); the store only adds the
//! record encoding described in [`values`](crate::values).
//!
//! # Put-if-absent
//!
//! The service has a conditional insert but no put-if-absent that reports
//! the stored value, so the store runs an optimistic loop:
//!
//! ```text
//!   ┌─► conditional insert ── ok ──────────────► Inserted(value)
//!   │        │ condition failed
//!   │        ▼
//!   │     read record ── present ──────────────► Existing(stored)
//!   │        │ absent (deleted in between)
//!   └────────┘
//! ```
//!
//! Every caller racing on one key ends with the same stored value.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
    time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tablekv_storage::{
    KeyValue, KeyValueStore, Lease, Metrics, MetricsCollector, Operation, PutIfAbsent,
    SharedHandle, StateStore, StorageError, StorageResult,
};
use tracing::{debug, warn};

use crate::{
    client::{MAX_BATCH_WRITE_ITEMS, PutCondition},
    config::TableSettings,
    connection::TableConnection,
    values::RecordCodec,
};

/// A [`KeyValueStore`] over one logical store in a shared table.
pub struct TableStore {
    name: String,
    codec: RecordCodec,
    lease: Mutex<Option<Lease<TableConnection>>>,
    metrics: Metrics,
}

impl TableStore {
    /// Opens the store `name` on a lease from `handle`.
    ///
    /// The table must exist; see [`ensure_table`](crate::ensure_table).
    ///
    /// # Errors
    ///
    /// Returns the client construction error if this lease starts a new
    /// client generation and the client cannot be built.
    pub async fn open(
        handle: &SharedHandle<TableConnection>,
        settings: Arc<TableSettings>,
        name: impl Into<String>,
        metrics: Metrics,
    ) -> StorageResult<Self> {
        let lease = handle.open().await?;
        Ok(Self::from_lease(lease, settings, name, metrics))
    }

    pub(crate) fn from_lease(
        lease: Lease<TableConnection>,
        settings: Arc<TableSettings>,
        name: impl Into<String>,
        metrics: Metrics,
    ) -> Self {
        let name = name.into();
        Self {
            codec: RecordCodec::new(settings, name.clone()),
            name,
            lease: Mutex::new(Some(lease)),
            metrics,
        }
    }

    /// Returns the generation of the client this store is leasing, or
    /// `None` once closed.
    #[must_use]
    pub fn client_generation(&self) -> Option<u64> {
        self.lease.lock().as_ref().map(Lease::generation)
    }

    fn connection(&self) -> StorageResult<Arc<TableConnection>> {
        self.lease
            .lock()
            .as_ref()
            .map(|lease| Arc::clone(lease.resource()))
            .ok_or_else(|| StorageError::not_open(&self.name))
    }

    fn finish<T>(&self, op: Operation, start: Instant, result: &StorageResult<T>) {
        self.metrics.record(op, start.elapsed());
        if let Err(err) = result {
            self.metrics.record_error(err);
        }
    }

    async fn get_record(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let connection = self.connection()?;
        let item = connection.client().get_item(self.codec.table(), self.codec.key_item(key)).await?;
        item.map(|item| self.codec.decode_record(&item)).transpose()
    }

    async fn put_record(&self, key: &[u8], value: Bytes) -> StorageResult<()> {
        let connection = self.connection()?;
        connection
            .client()
            .put_item(self.codec.table(), self.codec.record_item(key, value), PutCondition::Always)
            .await?;
        Ok(())
    }

    async fn put_records(&self, entries: Vec<KeyValue>) -> StorageResult<()> {
        let connection = self.connection()?;
        let entries = last_occurrence_wins(entries);

        for (index, chunk) in entries.chunks(MAX_BATCH_WRITE_ITEMS).enumerate() {
            let items = chunk.iter().map(|kv| self.codec.record_item(&kv.key, kv.value.clone())).collect();
            debug!(chunk = index, items = chunk.len(), "Submitting bulk write");

            let output = connection.client().batch_write_item(self.codec.table(), items).await?;
            self.metrics.record_chunk();

            if !output.unprocessed.is_empty() {
                warn!(
                    chunk = index,
                    unprocessed = output.unprocessed.len(),
                    "Bulk write left items unprocessed"
                );
                return Err(StorageError::connection(format!(
                    "{} of {} items in bulk write {index} were not processed",
                    output.unprocessed.len(),
                    chunk.len()
                )));
            }
        }
        Ok(())
    }

    async fn insert_or_read(&self, key: &[u8], value: Bytes) -> StorageResult<PutIfAbsent> {
        let connection = self.connection()?;
        let client = connection.client();
        let table = self.codec.table();
        let record = self.codec.record_item(key, value.clone());
        let condition = PutCondition::AttributeNotExists(self.codec.sort_key_column().to_owned());

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match client.put_item(table, record.clone(), condition.clone()).await {
                Ok(()) => return Ok(PutIfAbsent::Inserted(value)),
                Err(err) if err.is_conditional_check_failed() => {
                    self.metrics.record_conflict();
                },
                Err(err) => return Err(err.into()),
            }

            match client.get_item(table, self.codec.key_item(key)).await? {
                Some(item) => return self.codec.decode_record(&item).map(PutIfAbsent::Existing),
                None => {
                    self.metrics.record_retry();
                    debug!(attempt, "Competing record vanished before it could be read; retrying");
                },
            }
        }
    }

    async fn delete_record(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let connection = self.connection()?;
        let old = connection.client().delete_item(self.codec.table(), self.codec.key_item(key)).await?;
        old.map(|item| self.codec.decode_record(&item)).transpose()
    }
}

/// Collapses duplicate keys, keeping each key at its first position with the
/// value of its last occurrence.
fn last_occurrence_wins(entries: Vec<KeyValue>) -> Vec<KeyValue> {
    let mut positions: HashMap<Bytes, usize> = HashMap::with_capacity(entries.len());
    let mut unique: Vec<KeyValue> = Vec::with_capacity(entries.len());
    for kv in entries {
        match positions.entry(kv.key.clone()) {
            Entry::Occupied(slot) => unique[*slot.get()].value = kv.value,
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(kv);
            },
        }
    }
    unique
}

impl std::fmt::Debug for TableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStore")
            .field("name", &self.name)
            .field("table", &self.codec.table())
            .field("open", &self.is_open())
            .finish()
    }
}

impl MetricsCollector for TableStore {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[async_trait]
impl StateStore for TableStore {
    fn name(&self) -> &str {
        &self.name
    }

    /// Releases the client lease. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// If this was the last lease of its generation, returns the client's
    /// close error.
    #[tracing::instrument(skip(self), fields(store = %self.name))]
    async fn close(&self) -> StorageResult<()> {
        let lease = self.lease.lock().take();
        match lease {
            Some(lease) => {
                debug!(generation = lease.generation(), "Releasing table client lease");
                lease.release().await
            },
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.lease.lock().is_some()
    }

    fn persistent(&self) -> bool {
        true
    }
}

#[async_trait]
impl KeyValueStore for TableStore {
    #[tracing::instrument(skip(self, key), fields(store = %self.name, key_len = key.len()))]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let start = Instant::now();
        let result = self.get_record(key).await;
        self.finish(Operation::Get, start, &result);
        result
    }

    #[tracing::instrument(
        skip(self, key, value),
        fields(store = %self.name, key_len = key.len(), value_len = value.len())
    )]
    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let start = Instant::now();
        let result = self.put_record(&key, Bytes::from(value)).await;
        self.finish(Operation::Put, start, &result);
        result
    }

    #[tracing::instrument(skip(self, entries), fields(store = %self.name, count = entries.len()))]
    async fn put_all(&self, entries: Vec<KeyValue>) -> StorageResult<()> {
        let start = Instant::now();
        let result = self.put_records(entries).await;
        self.finish(Operation::PutAll, start, &result);
        result
    }

    #[tracing::instrument(skip(self, key, value), fields(store = %self.name, key_len = key.len()))]
    async fn put_if_absent(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<PutIfAbsent> {
        let start = Instant::now();
        let result = self.insert_or_read(&key, Bytes::from(value)).await;
        self.finish(Operation::PutIfAbsent, start, &result);
        result
    }

    #[tracing::instrument(skip(self, key), fields(store = %self.name, key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let start = Instant::now();
        let result = self.delete_record(key).await;
        self.finish(Operation::Delete, start, &result);
        result
    }
}
