//! Shared table client connections.

use async_trait::async_trait;
use tablekv_storage::{ResourceFactory, SharedResource, StorageResult};

use crate::client::{TableClient, TableConnector};

/// A table client shared between stores through a
/// [`SharedHandle`](tablekv_storage::SharedHandle).
pub struct TableConnection {
    client: Box<dyn TableClient>,
}

impl TableConnection {
    /// Wraps a connected client.
    pub fn new(client: Box<dyn TableClient>) -> Self {
        Self { client }
    }

    /// Returns the client.
    #[must_use]
    pub fn client(&self) -> &dyn TableClient {
        self.client.as_ref()
    }
}

impl std::fmt::Debug for TableConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableConnection").finish_non_exhaustive()
    }
}

#[async_trait]
impl SharedResource for TableConnection {
    async fn close(&self) -> StorageResult<()> {
        self.client.close().await.map_err(Into::into)
    }
}

/// Adapts a [`TableConnector`] to the shared handle's resource factory.
pub(crate) struct Connect<C>(pub(crate) C);

#[async_trait]
impl<C: TableConnector> ResourceFactory for Connect<C> {
    type Resource = TableConnection;

    async fn create(&self) -> StorageResult<TableConnection> {
        let client = self.0.connect().await?;
        Ok(TableConnection::new(client))
    }
}
