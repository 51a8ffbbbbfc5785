//! The table service client seam.
//!
//! [`TableClient`] is the subset of a partitioned table service's API that
//! the store uses: single-item reads, writes and deletes, conditional
//! inserts, bulk writes and table creation. Items are attribute maps.
//!
//! # Service rules
//!
//! Implementations model a service with these limits, and the store is
//! written against them:
//!
//! | Rule | Limit |
//! |------|-------|
//! | Partition key size | 1..=[`MAX_PARTITION_KEY_BYTES`] bytes |
//! | Binary attributes | never empty |
//! | Items per bulk write | at most [`MAX_BATCH_WRITE_ITEMS`], no duplicate keys |
//! | Conditional insert | native; put-if-absent is not |

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Maximum number of items in one bulk write.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Maximum size of a binary partition key attribute.
pub const MAX_PARTITION_KEY_BYTES: usize = 2048;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// Binary. The service rejects empty binaries.
    B(Bytes),
    /// String.
    S(String),
    /// Explicit null.
    Null,
}

impl AttributeValue {
    /// Returns the binary payload, if this is a binary attribute.
    #[must_use]
    pub fn as_b(&self) -> Option<&Bytes> {
        match self {
            Self::B(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a string attribute.
    #[must_use]
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for the null attribute.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// An item: attribute name to value.
pub type Item = HashMap<String, AttributeValue>;

/// Precondition of a single-item write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutCondition {
    /// Write unconditionally.
    Always,
    /// Write only if no item with this key has the named attribute, which
    /// for a key attribute means no item exists.
    AttributeNotExists(String),
}

/// Capacity mode of a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BillingMode {
    /// Billed per request; no capacity to manage.
    #[default]
    PayPerRequest,
    /// Fixed read and write capacity.
    Provisioned {
        /// Read capacity units.
        read_capacity_units: u64,
        /// Write capacity units.
        write_capacity_units: u64,
    },
}

/// Primary key layout of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    /// Binary partition (hash) key attribute.
    pub hash_key: String,
    /// String sort (range) key attribute.
    pub sort_key: String,
}

/// Parameters of `create_table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTableRequest {
    /// Table name.
    pub table: String,
    /// Primary key layout.
    pub key_schema: KeySchema,
    /// Capacity mode.
    pub billing_mode: BillingMode,
}

/// Result of a bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchWriteOutput {
    /// Items the service accepted the request for but did not write.
    pub unprocessed: Vec<Item>,
}

/// A client of a partitioned table service.
///
/// Implementations must be safe to share between tasks. Every method may
/// perform network I/O.
#[async_trait]
pub trait TableClient: Send + Sync + 'static {
    /// Reads the item with primary key `key`.
    async fn get_item(&self, table: &str, key: Item) -> Result<Option<Item>>;

    /// Writes `item`, replacing any item with the same primary key, if
    /// `condition` holds.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::ConditionalCheckFailed`](crate::TableError::ConditionalCheckFailed)
    /// when the condition does not hold.
    async fn put_item(&self, table: &str, item: Item, condition: PutCondition) -> Result<()>;

    /// Deletes the item with primary key `key`, returning its old attributes.
    async fn delete_item(&self, table: &str, key: Item) -> Result<Option<Item>>;

    /// Writes up to [`MAX_BATCH_WRITE_ITEMS`] items with distinct keys.
    ///
    /// Items the service could not write are returned in
    /// [`BatchWriteOutput::unprocessed`].
    async fn batch_write_item(&self, table: &str, items: Vec<Item>) -> Result<BatchWriteOutput>;

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::TableAlreadyExists`](crate::TableError::TableAlreadyExists)
    /// if the table exists.
    async fn create_table(&self, request: CreateTableRequest) -> Result<()>;

    /// Releases the client's connections. Later calls fail with
    /// [`TableError::ClientClosed`](crate::TableError::ClientClosed).
    async fn close(&self) -> Result<()>;
}

/// Builds table clients.
///
/// A [`StoreFactory`](crate::StoreFactory) calls `connect` once per client
/// generation: when the first store is opened, and again after every store
/// has been closed.
#[async_trait]
pub trait TableConnector: Send + Sync + 'static {
    /// Creates a connected client.
    async fn connect(&self) -> Result<Box<dyn TableClient>>;
}
