//! In-process table service.
//!
//! [`MemoryTableServer`] holds tables in memory and hands out
//! [`MemoryTableClient`]s that enforce the same request rules as the remote
//! service: tagged non-empty partition keys of at most 2048 bytes, no empty
//! binary attributes, at most 25 distinct items per bulk write, native
//! conditional inserts and "return old item" deletes.
//!
//! The server counts constructed and closed clients and every request kind,
//! so tests can observe client lifecycles and round trips.
//!
//! # Fault injection
//!
//! With the `failpoints` feature, each request kind has a fail point:
//!
//! | Fail point | Request |
//! |------------|---------|
//! | `table-get-item` | `get_item` |
//! | `table-put-item` | unconditional `put_item` |
//! | `table-put-item-conditional` | conditional `put_item` |
//! | `table-batch-write` | `batch_write_item` |
//! | `table-delete-item` | `delete_item` |
//!
//! The `return` action's argument selects the error: `timeout`, `throttled`,
//! `internal`, anything else a connection error. Deterministic hooks that
//! need no feature are [`MemoryTableServer::inject_unprocessed`] and
//! [`MemoryTableServer::inject_delete_after_conflict`].

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    client::{
        AttributeValue, BatchWriteOutput, BillingMode, CreateTableRequest, Item, KeySchema,
        MAX_BATCH_WRITE_ITEMS, MAX_PARTITION_KEY_BYTES, PutCondition, TableClient, TableConnector,
    },
    error::{Result, TableError},
};

type RowKey = (Bytes, String);

struct MemoryTable {
    schema: KeySchema,
    billing_mode: BillingMode,
    rows: HashMap<RowKey, Item>,
}

impl MemoryTable {
    /// Validates the primary key attributes of `item`.
    fn row_key(&self, item: &Item) -> Result<RowKey> {
        let hash = match item.get(&self.schema.hash_key) {
            Some(AttributeValue::B(bytes)) => bytes,
            Some(_) => {
                return Err(TableError::validation(format!(
                    "key attribute '{}' must be binary",
                    self.schema.hash_key
                )));
            },
            None => {
                return Err(TableError::validation(format!(
                    "missing key attribute '{}'",
                    self.schema.hash_key
                )));
            },
        };
        if hash.is_empty() || hash.len() > MAX_PARTITION_KEY_BYTES {
            return Err(TableError::validation(format!(
                "partition key size {} outside 1..={MAX_PARTITION_KEY_BYTES}",
                hash.len()
            )));
        }

        let sort = match item.get(&self.schema.sort_key) {
            Some(AttributeValue::S(s)) if !s.is_empty() => s,
            _ => {
                return Err(TableError::validation(format!(
                    "key attribute '{}' must be a non-empty string",
                    self.schema.sort_key
                )));
            },
        };

        Ok((hash.clone(), sort.clone()))
    }

    /// Validates a key-only item.
    fn key_only(&self, key: &Item) -> Result<RowKey> {
        if key.len() != 2 {
            return Err(TableError::validation("key must contain exactly the key attributes"));
        }
        self.row_key(key)
    }
}

fn check_no_empty_binary(item: &Item) -> Result<()> {
    match item.iter().find(|(_, value)| matches!(value, AttributeValue::B(b) if b.is_empty())) {
        Some((name, _)) => {
            Err(TableError::validation(format!("binary attribute '{name}' must not be empty")))
        },
        None => Ok(()),
    }
}

#[cfg_attr(not(feature = "failpoints"), allow(dead_code))]
fn injected_error(arg: Option<String>) -> TableError {
    match arg.as_deref() {
        Some("timeout") => TableError::Timeout { duration_ms: 30_000 },
        Some("throttled") => {
            TableError::ThroughputExceeded { message: "injected throttling".into() }
        },
        Some("internal") => TableError::Internal { message: "injected failure".into() },
        _ => TableError::connection("injected connection failure"),
    }
}

/// Request and lifecycle counters of a [`MemoryTableServer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Clients handed out by `connect`.
    pub clients_created: u64,
    /// Clients closed.
    pub clients_closed: u64,
    /// `get_item` requests.
    pub get_item: u64,
    /// Unconditional `put_item` requests.
    pub put_item: u64,
    /// Conditional `put_item` requests.
    pub conditional_put: u64,
    /// Conditional `put_item` requests whose condition failed.
    pub conditional_check_failed: u64,
    /// `delete_item` requests.
    pub delete_item: u64,
    /// `batch_write_item` requests.
    pub batch_write: u64,
    /// Items submitted through `batch_write_item`.
    pub batch_items: u64,
    /// `create_table` requests.
    pub create_table: u64,
}

#[derive(Default)]
struct Counters {
    clients_created: AtomicU64,
    clients_closed: AtomicU64,
    get_item: AtomicU64,
    put_item: AtomicU64,
    conditional_put: AtomicU64,
    conditional_check_failed: AtomicU64,
    delete_item: AtomicU64,
    batch_write: AtomicU64,
    batch_items: AtomicU64,
    create_table: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Default)]
struct ServerInner {
    tables: RwLock<HashMap<String, MemoryTable>>,
    counters: Counters,
    unprocessed_next_batch: AtomicUsize,
    delete_after_conflict: AtomicUsize,
}

/// An in-memory table service.
///
/// Cloning is cheap; clones share the same tables and counters.
#[derive(Clone, Default)]
pub struct MemoryTableServer {
    inner: Arc<ServerInner>,
}

impl MemoryTableServer {
    /// Creates a server with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client connected to this server.
    #[must_use]
    pub fn client(&self) -> MemoryTableClient {
        bump(&self.inner.counters.clients_created);
        MemoryTableClient { server: Arc::clone(&self.inner), closed: AtomicBool::new(false) }
    }

    /// Creates a table directly, bypassing any client. Returns `false` if
    /// it already existed.
    pub fn create_table_now(&self, table: &str, schema: KeySchema) -> bool {
        let mut tables = self.inner.tables.write();
        if tables.contains_key(table) {
            return false;
        }
        tables.insert(
            table.to_owned(),
            MemoryTable { schema, billing_mode: BillingMode::default(), rows: HashMap::new() },
        );
        true
    }

    /// Returns `true` if `table` exists.
    #[must_use]
    pub fn table_exists(&self, table: &str) -> bool {
        self.inner.tables.read().contains_key(table)
    }

    /// Returns the billing mode `table` was created with.
    #[must_use]
    pub fn billing_mode(&self, table: &str) -> Option<BillingMode> {
        self.inner.tables.read().get(table).map(|t| t.billing_mode)
    }

    /// Returns the number of items in `table`, across all stores.
    #[must_use]
    pub fn item_count(&self, table: &str) -> usize {
        self.inner.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    /// Returns the raw item stored under `(hash_key, sort_key)`.
    #[must_use]
    pub fn raw_item(&self, table: &str, hash_key: &[u8], sort_key: &str) -> Option<Item> {
        let row = (Bytes::copy_from_slice(hash_key), sort_key.to_owned());
        self.inner.tables.read().get(table).and_then(|t| t.rows.get(&row).cloned())
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        let c = &self.inner.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ServerStats {
            clients_created: load(&c.clients_created),
            clients_closed: load(&c.clients_closed),
            get_item: load(&c.get_item),
            put_item: load(&c.put_item),
            conditional_put: load(&c.conditional_put),
            conditional_check_failed: load(&c.conditional_check_failed),
            delete_item: load(&c.delete_item),
            batch_write: load(&c.batch_write),
            batch_items: load(&c.batch_items),
            create_table: load(&c.create_table),
        }
    }

    /// Makes the next bulk write leave its last `count` items unwritten and
    /// report them as unprocessed.
    pub fn inject_unprocessed(&self, count: usize) {
        self.inner.unprocessed_next_batch.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` failed conditional inserts delete the item
    /// they collided with, as a concurrent deleter would.
    pub fn inject_delete_after_conflict(&self, count: usize) {
        self.inner.delete_after_conflict.store(count, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MemoryTableServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTableServer").field("stats", &self.stats()).finish_non_exhaustive()
    }
}

#[async_trait]
impl TableConnector for MemoryTableServer {
    async fn connect(&self) -> Result<Box<dyn TableClient>> {
        Ok(Box::new(self.client()))
    }
}

/// A client of a [`MemoryTableServer`].
pub struct MemoryTableClient {
    server: Arc<ServerInner>,
    closed: AtomicBool,
}

impl MemoryTableClient {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) { Err(TableError::ClientClosed) } else { Ok(()) }
    }

    /// Returns `true` once the client has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MemoryTableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTableClient").field("closed", &self.is_closed()).finish_non_exhaustive()
    }
}

fn table_not_found(table: &str) -> TableError {
    TableError::TableNotFound { table: table.to_owned() }
}

#[async_trait]
impl TableClient for MemoryTableClient {
    async fn get_item(&self, table: &str, key: Item) -> Result<Option<Item>> {
        self.ensure_open()?;
        bump(&self.server.counters.get_item);
        fail_point!("table-get-item", |arg| Err(injected_error(arg)));

        let tables = self.server.tables.read();
        let t = tables.get(table).ok_or_else(|| table_not_found(table))?;
        let row = t.key_only(&key)?;
        Ok(t.rows.get(&row).cloned())
    }

    async fn put_item(&self, table: &str, item: Item, condition: PutCondition) -> Result<()> {
        self.ensure_open()?;
        match &condition {
            PutCondition::Always => {
                bump(&self.server.counters.put_item);
                fail_point!("table-put-item", |arg| Err(injected_error(arg)));
            },
            PutCondition::AttributeNotExists(_) => {
                bump(&self.server.counters.conditional_put);
                fail_point!("table-put-item-conditional", |arg| Err(injected_error(arg)));
            },
        }
        check_no_empty_binary(&item)?;

        let mut tables = self.server.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
        let row = t.row_key(&item)?;

        if let PutCondition::AttributeNotExists(attribute) = &condition {
            let collides = t.rows.get(&row).is_some_and(|existing| existing.contains_key(attribute));
            if collides {
                bump(&self.server.counters.conditional_check_failed);
                let vanish = self
                    .server
                    .delete_after_conflict
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if vanish {
                    debug!(table, "Deleting conflicting item after conditional check failure");
                    t.rows.remove(&row);
                }
                return Err(TableError::ConditionalCheckFailed);
            }
        }

        t.rows.insert(row, item);
        Ok(())
    }

    async fn delete_item(&self, table: &str, key: Item) -> Result<Option<Item>> {
        self.ensure_open()?;
        bump(&self.server.counters.delete_item);
        fail_point!("table-delete-item", |arg| Err(injected_error(arg)));

        let mut tables = self.server.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
        let row = t.key_only(&key)?;
        Ok(t.rows.remove(&row))
    }

    async fn batch_write_item(&self, table: &str, items: Vec<Item>) -> Result<BatchWriteOutput> {
        self.ensure_open()?;
        bump(&self.server.counters.batch_write);
        self.server.counters.batch_items.fetch_add(items.len() as u64, Ordering::Relaxed);
        fail_point!("table-batch-write", |arg| Err(injected_error(arg)));

        if items.is_empty() || items.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(TableError::validation(format!(
                "batch must contain 1..={MAX_BATCH_WRITE_ITEMS} items, got {}",
                items.len()
            )));
        }

        let mut tables = self.server.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;

        let mut rows = Vec::with_capacity(items.len());
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            check_no_empty_binary(item)?;
            let row = t.row_key(item)?;
            if !seen.insert(row.clone()) {
                return Err(TableError::validation("batch contains duplicate item keys"));
            }
            rows.push(row);
        }

        let skip = self.server.unprocessed_next_batch.swap(0, Ordering::SeqCst).min(items.len());
        let written = items.len() - skip;
        let mut unprocessed = Vec::with_capacity(skip);
        for (index, (row, item)) in rows.into_iter().zip(items).enumerate() {
            if index < written {
                t.rows.insert(row, item);
            } else {
                unprocessed.push(item);
            }
        }

        Ok(BatchWriteOutput { unprocessed })
    }

    async fn create_table(&self, request: CreateTableRequest) -> Result<()> {
        self.ensure_open()?;
        bump(&self.server.counters.create_table);

        let mut tables = self.server.tables.write();
        if tables.contains_key(&request.table) {
            return Err(TableError::TableAlreadyExists { table: request.table });
        }
        debug!(table = %request.table, "Creating table");
        tables.insert(
            request.table,
            MemoryTable {
                schema: request.key_schema,
                billing_mode: request.billing_mode,
                rows: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            bump(&self.server.counters.clients_closed);
        }
        Ok(())
    }
}
