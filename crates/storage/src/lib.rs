//! Key-value state store contract for stream-processing hosts.
//!
//! This crate defines the traits a table-backed state store implements and
//! the building blocks that are independent of any particular table
//! backend:
//!
//! - [`StateStore`] / [`KeyValueStore`]: the lifecycle and byte-oriented key-value contract
//! - [`SharedHandle`]: a lock-free, reference-counted handle to a lazily constructed client
//! - [`KeyCodec`] / [`HashingStore`]: normalization of keys that exceed the backend's key size
//! - [`LateInitStore`]: a store whose delegate is opened on the host's `init` call
//! - [`Metrics`]: operation counters shared between stores
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Stream-processing host                   │
//! │          (init / get / put / delete / close)             │
//! ├──────────────────────────────────────────────────────────┤
//! │        HashingStore  (KeyCodec: oversized → SHA-512)     │
//! ├──────────────────────────────────────────────────────────┤
//! │   TableStore (tablekv-storage-table)  │  MemoryStore     │
//! │      Lease on SharedHandle<Client>    │   (testing)      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use tablekv_storage::{HashingStore, KeyCodec, KeyValueStore, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = HashingStore::new(MemoryStore::new("clicks"), KeyCodec::default());
//!
//!     store.put(b"user:123".to_vec(), b"4".to_vec()).await?;
//!     assert_eq!(store.get(b"user:123").await?.as_deref(), Some(&b"4"[..]));
//!
//!     let outcome = store.put_if_absent(b"user:123".to_vec(), b"0".to_vec()).await?;
//!     assert!(!outcome.was_inserted());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the [`testutil`] helpers and the [`conformance`] suite. Enable it in
//!   `[dev-dependencies]` for integration tests of store implementations.

#![deny(unsafe_code)]

#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod hashing;
pub mod late_init;
pub mod memory;
pub mod metrics;
pub mod shared;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use hashing::{DEFAULT_KEY_HASH_THRESHOLD, HASHED_KEY_LEN, HashingStore, KeyCodec};
pub use late_init::{LateInitStore, StoreOpener};
pub use memory::MemoryStore;
pub use metrics::{Metrics, MetricsCollector, MetricsSnapshot, Operation};
pub use shared::{FnFactory, Lease, ResourceFactory, SharedHandle, SharedResource};
pub use store::{KeyValueStore, StateStore};
pub use types::{KeyValue, PutIfAbsent};
