//! Store construction over one shared table client.

use std::sync::Arc;

use async_trait::async_trait;
use tablekv_storage::{
    ConfigError, HashingStore, KeyCodec, LateInitStore, Metrics, SharedHandle, StorageError,
    StorageResult, StoreOpener,
};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    client::TableConnector,
    config::{StoreFactoryConfig, TableSettings},
    connection::{Connect, TableConnection},
    provision::ensure_table,
    store::TableStore,
};

struct FactoryInner {
    config: StoreFactoryConfig,
    settings: Arc<TableSettings>,
    codec: KeyCodec,
    handle: SharedHandle<TableConnection>,
    provisioned: OnceCell<()>,
    metrics: Metrics,
}

/// Opens [`TableStore`]s that share one table client and one table.
///
/// The client is built by the connector when the first store is opened and
/// closed when the last open store is closed; a later `open` builds a new
/// one. Every store returned by [`open`](StoreFactory::open) normalizes
/// oversized keys with the configured [`KeyCodec`].
///
/// Cloning is cheap; clones share the client, the metrics and the
/// provisioning state.
///
/// # Example
///
/// ```
/// use tablekv_storage::{KeyValueStore, StateStore};
/// use tablekv_storage_table::{MemoryTableServer, StoreFactory, StoreFactoryConfig, TableSettings};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = StoreFactoryConfig::builder()
///         .table(TableSettings::builder().table("stream-state").build()?)
///         .build()?;
///     let factory = StoreFactory::new(config, MemoryTableServer::new())?;
///
///     let store = factory.open("clicks").await?;
///     store.put(b"user:1".to_vec(), b"3".to_vec()).await?;
///     assert_eq!(store.get(b"user:1").await?.as_deref(), Some(&b"3"[..]));
///     store.close().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct StoreFactory {
    inner: Arc<FactoryInner>,
}

impl StoreFactory {
    /// Creates a factory. No client is built until the first store opens.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new<C: TableConnector>(
        config: StoreFactoryConfig,
        connector: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let codec = config.key_codec()?;
        let settings = Arc::new(config.table().clone());
        Ok(Self {
            inner: Arc::new(FactoryInner {
                config,
                settings,
                codec,
                handle: SharedHandle::new(Connect(connector)),
                provisioned: OnceCell::new(),
                metrics: Metrics::new(),
            }),
        })
    }

    /// Opens the store `name`.
    ///
    /// Takes a lease on the shared client, building it if no store is open,
    /// and provisions the table the first time any store opens, if the
    /// configuration asks for it.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is empty, the client cannot be built, or
    /// table creation fails. A failed open holds no lease.
    #[tracing::instrument(skip(self), fields(table = %self.inner.settings.table()))]
    pub async fn open(&self, name: &str) -> StorageResult<HashingStore<TableStore>> {
        if name.is_empty() {
            return Err(StorageError::internal_with_source(
                "store name must not be empty",
                ConfigError::Empty { field: "name" },
            ));
        }

        let inner = &self.inner;
        let lease = inner.handle.open().await?;

        if inner.config.provision_table() {
            let provisioned = inner
                .provisioned
                .get_or_try_init(|| async {
                    ensure_table(
                        lease.resource().client(),
                        &inner.settings,
                        inner.config.billing_mode(),
                    )
                    .await
                })
                .await;
            if let Err(err) = provisioned {
                lease.release().await?;
                return Err(err);
            }
        }

        debug!(generation = lease.generation(), "Opened store");
        let store = TableStore::from_lease(
            lease,
            Arc::clone(&inner.settings),
            name,
            inner.metrics.clone(),
        );
        Ok(HashingStore::new(store, inner.codec))
    }

    /// Returns a store that opens itself through this factory on `init`.
    pub fn late_init(&self, name: impl Into<String>) -> LateInitStore<StoreFactory> {
        LateInitStore::new(name, self.clone())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreFactoryConfig {
        &self.inner.config
    }

    /// Returns the metrics shared by every store this factory opened.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Returns the handle to the shared client.
    #[must_use]
    pub fn shared_client(&self) -> &SharedHandle<TableConnection> {
        &self.inner.handle
    }

    /// Logs the shared metrics at info level.
    pub fn log_metrics(&self) {
        info!(
            table = %self.inner.settings.table(),
            generation = self.inner.handle.generation(),
            open_stores = self.inner.handle.holders(),
            "Store factory status"
        );
        self.inner.metrics.log_metrics();
    }
}

impl std::fmt::Debug for StoreFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFactory")
            .field("config", &self.inner.config)
            .field("handle", &self.inner.handle)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StoreOpener for StoreFactory {
    type Store = HashingStore<TableStore>;

    async fn open(&self, name: &str) -> StorageResult<Self::Store> {
        StoreFactory::open(self, name).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use tablekv_storage::{KeyValueStore, StateStore};

    use super::*;
    use crate::{client::BillingMode, memory::MemoryTableServer};

    fn config(provision: bool) -> StoreFactoryConfig {
        StoreFactoryConfig::builder()
            .table(TableSettings::builder().table("kv").build().unwrap())
            .provision_table(provision)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_provisions_once() {
        let server = MemoryTableServer::new();
        let factory = StoreFactory::new(config(true), server.clone()).unwrap();

        let a = factory.open("a").await.unwrap();
        let b = factory.open("b").await.unwrap();

        assert!(server.table_exists("kv"));
        assert_eq!(server.stats().create_table, 1);
        assert_eq!(server.billing_mode("kv"), Some(BillingMode::PayPerRequest));
        assert_eq!(server.stats().clients_created, 1);

        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_without_provisioning_requires_table() {
        let server = MemoryTableServer::new();
        let factory = StoreFactory::new(config(false), server.clone()).unwrap();

        let store = factory.open("a").await.unwrap();
        assert!(!server.table_exists("kv"));
        let err = store.get(b"k").await.unwrap_err();
        assert!(matches!(err, StorageError::Internal { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected_without_lease() {
        let server = MemoryTableServer::new();
        let factory = StoreFactory::new(config(true), server.clone()).unwrap();

        assert!(factory.open("").await.is_err());
        assert_eq!(server.stats().clients_created, 0);
        assert_eq!(factory.shared_client().holders(), 0);
    }

    #[tokio::test]
    async fn test_failed_provisioning_releases_lease() {
        struct ClosedConnector(MemoryTableServer);

        #[async_trait]
        impl crate::client::TableConnector for ClosedConnector {
            async fn connect(&self) -> crate::error::Result<Box<dyn crate::client::TableClient>> {
                let client = self.0.client();
                crate::client::TableClient::close(&client).await?;
                Ok(Box::new(client))
            }
        }

        let server = MemoryTableServer::new();
        let factory = StoreFactory::new(config(true), ClosedConnector(server.clone())).unwrap();

        let err = factory.open("a").await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
        assert_eq!(factory.shared_client().holders(), 0);
        assert!(!factory.shared_client().is_realized());
    }

    #[tokio::test]
    async fn test_late_init_store_opens_on_init() {
        let server = MemoryTableServer::new();
        let factory = StoreFactory::new(config(true), server.clone()).unwrap();
        let store = factory.late_init("deferred");

        assert!(!store.is_open());
        assert_eq!(server.stats().clients_created, 0);

        store.init().await.unwrap();
        store.put(b"k".to_vec(), b"v".to_vec()).await.unwrap();
        assert_eq!(server.stats().clients_created, 1);

        store.close().await.unwrap();
        assert_eq!(server.stats().clients_closed, 1);
    }

    #[tokio::test]
    async fn test_metrics_are_shared_between_stores() {
        let server = MemoryTableServer::new();
        let factory = StoreFactory::new(config(true), server).unwrap();
        let a = factory.open("a").await.unwrap();
        let b = factory.open("b").await.unwrap();

        a.put(b"k".to_vec(), b"1".to_vec()).await.unwrap();
        b.get(b"k").await.unwrap();

        let snapshot = factory.metrics().snapshot();
        assert_eq!(snapshot.put.count, 1);
        assert_eq!(snapshot.get.count, 1);
    }
}
