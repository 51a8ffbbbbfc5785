//! Table provisioning.

use tablekv_storage::StorageResult;
use tracing::{debug, info};

use crate::{
    client::{BillingMode, CreateTableRequest, TableClient},
    config::TableSettings,
    error::TableError,
};

/// Creates the table described by `settings` unless it already exists.
///
/// The key schema is a binary partition key and a string sort key, named
/// after the configured columns. An existing table counts as success; its
/// schema is not checked.
///
/// # Errors
///
/// Returns any other table service error, converted to
/// [`StorageError`](tablekv_storage::StorageError).
#[tracing::instrument(skip(client, settings), fields(table = %settings.table()))]
pub async fn ensure_table(
    client: &dyn TableClient,
    settings: &TableSettings,
    billing_mode: BillingMode,
) -> StorageResult<()> {
    let request = CreateTableRequest {
        table: settings.table().to_owned(),
        key_schema: settings.key_schema(),
        billing_mode,
    };

    match client.create_table(request).await {
        Ok(()) => {
            info!(?billing_mode, "Created table");
            Ok(())
        },
        Err(TableError::TableAlreadyExists { .. }) => {
            debug!("Table already exists");
            Ok(())
        },
        Err(err) => Err(err.into()),
    }
}
