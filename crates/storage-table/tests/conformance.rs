//! Conformance suite for table-backed stores.
//!
//! Every check runs against a store opened through [`StoreFactory`] on a
//! fresh in-memory table service, so requests pass the service's key size,
//! empty-binary and bulk-write rules.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use tablekv_storage::{HashingStore, conformance};
use tablekv_storage_table::{
    MemoryTableServer, StoreFactory, StoreFactoryConfig, TableSettings, TableStore,
};

async fn store() -> HashingStore<TableStore> {
    let config = StoreFactoryConfig::builder()
        .table(TableSettings::builder().table("conformance").build().expect("settings"))
        .build()
        .expect("config");
    let factory = StoreFactory::new(config, MemoryTableServer::new()).expect("factory");
    factory.open("suite").await.expect("open store")
}

macro_rules! conformance_tests {
    ($($name:ident),* $(,)?) => {
        $(
            #[tokio::test]
            async fn $name() {
                conformance::$name(&store().await).await;
            }
        )*
    };
}

// CRUD
conformance_tests!(
    crud_get_returns_none_for_missing_key,
    crud_put_then_get_returns_value,
    crud_put_overwrites_existing,
    crud_empty_value_is_not_absent,
    crud_empty_key_is_valid,
    crud_keys_are_byte_distinct,
);

// Delete
conformance_tests!(delete_returns_prior_value, delete_missing_returns_none, delete_returns_empty_value);

// Bulk
conformance_tests!(
    put_all_last_occurrence_wins,
    put_all_many_entries,
    put_all_duplicates_across_chunks,
    put_all_empty_is_noop,
);

// Put-if-absent
conformance_tests!(
    put_if_absent_inserts_when_absent,
    put_if_absent_keeps_existing,
    put_if_absent_treats_empty_value_as_present,
);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn put_if_absent_concurrent_single_winner() {
    conformance::put_if_absent_concurrent_single_winner(Arc::new(store().await), 16).await;
}

// Long keys
conformance_tests!(long_key_roundtrip, long_keys_stay_distinct, long_keys_consistent_across_operations);

// Unsupported and lifecycle
conformance_tests!(range_is_unsupported, all_is_unsupported, closed_store_rejects_operations);

#[tokio::test]
async fn late_init_store_conforms_after_init() {
    use tablekv_storage::StateStore;

    let config = StoreFactoryConfig::builder()
        .table(TableSettings::builder().table("conformance").build().expect("settings"))
        .build()
        .expect("config");
    let factory = StoreFactory::new(config, MemoryTableServer::new()).expect("factory");
    let store = factory.late_init("deferred");
    store.init().await.expect("init");

    conformance::crud_put_then_get_returns_value(&store).await;
    conformance::put_all_last_occurrence_wins(&store).await;
    conformance::long_key_roundtrip(&store).await;
    conformance::closed_store_rejects_operations(&store).await;
}
