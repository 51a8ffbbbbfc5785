//! Key-value state stores backed by a remote partitioned table service.
//!
//! Many logical stores share one physical table and one client:
//!
//! | Attribute | Type | Content |
//! |-----------|------|---------|
//! | hash key (`key`) | binary | `0x00` followed by the normalized key |
//! | sort key (`type`) | string | the store name |
//! | value (`value`) | binary or null | the value; null when empty |
//!
//! [`StoreFactory`] owns the shared client through a
//! [`SharedHandle`](tablekv_storage::SharedHandle): the first store opened
//! builds it, the last store closed closes it.
//!
//! The service itself sits behind [`TableClient`] / [`TableConnector`].
//! [`MemoryTableServer`] implements them in process, with the service's
//! request limits, for tests and local runs.
//!
//! # Feature Flags
//!
//! - **`failpoints`**: Enables fault injection in [`MemoryTableServer`] via the `fail` crate.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod memory;
pub mod provision;
pub mod store;
pub mod values;

pub use client::{
    AttributeValue, BatchWriteOutput, BillingMode, CreateTableRequest, Item, KeySchema,
    MAX_BATCH_WRITE_ITEMS, MAX_PARTITION_KEY_BYTES, PutCondition, TableClient, TableConnector,
};
pub use config::{StoreFactoryConfig, TableSettings};
pub use connection::TableConnection;
pub use error::TableError;
pub use factory::StoreFactory;
pub use memory::{MemoryTableClient, MemoryTableServer, ServerStats};
pub use provision::ensure_table;
pub use store::TableStore;
pub use values::{KEY_TAG, decode_value, encode_key, encode_value};
