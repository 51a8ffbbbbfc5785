//! Conformance suite for [`KeyValueStore`] implementations.
//!
//! Async check functions that validate whether a store satisfies the
//! key-value contract. Every store, in-memory or table-backed, runs the same
//! suite. Each function expects a fresh, open, empty store.
//!
//! # Usage
//!
//! ```no_run
//! use tablekv_storage::{MemoryStore, conformance};
//!
//! #[tokio::test]
//! async fn crud_get_returns_none_for_missing_key() {
//!     conformance::crud_get_returns_none_for_missing_key(&MemoryStore::new("c")).await;
//! }
//! ```
//!
//! # Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | CRUD | Read-after-write, overwrite, empty values and keys |
//! | Delete | Prior value returned, then absent |
//! | Bulk | Last occurrence wins, many chunks, empty input |
//! | Put-if-absent | Sequential and concurrent single winner |
//! | Long keys | Oversized keys are usable and stay distinct |
//! | Unsupported | `range` and `all` fail fast |
//! | Lifecycle | Closed stores reject operations |

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinSet;

use crate::{
    assert_not_open, assert_unsupported,
    store::KeyValueStore,
    testutil::{make_key, make_long_key, make_tagged_value},
    types::KeyValue,
};

// ============================================================================
// CRUD
// ============================================================================

/// `get` on a key that was never written returns `Ok(None)`.
pub async fn crud_get_returns_none_for_missing_key<S: KeyValueStore>(store: &S) {
    let result = store.get(b"nonexistent").await;
    assert!(result.is_ok(), "get should not error on missing key: {result:?}");
    assert_eq!(result.expect("checked above"), None, "missing key should return None");
}

/// `put` then `get` returns the value.
pub async fn crud_put_then_get_returns_value<S: KeyValueStore>(store: &S) {
    store.put(b"k1".to_vec(), b"v1".to_vec()).await.expect("put should succeed");
    let val = store.get(b"k1").await.expect("get should succeed");
    assert_eq!(val, Some(Bytes::from("v1")));
}

/// A second `put` overwrites the first.
pub async fn crud_put_overwrites_existing<S: KeyValueStore>(store: &S) {
    store.put(b"k1".to_vec(), b"original".to_vec()).await.expect("put");
    store.put(b"k1".to_vec(), b"updated".to_vec()).await.expect("overwrite");
    let val = store.get(b"k1").await.expect("get");
    assert_eq!(val, Some(Bytes::from("updated")));
}

/// An empty value is stored and read back as present-and-empty.
pub async fn crud_empty_value_is_not_absent<S: KeyValueStore>(store: &S) {
    store.put(b"empty".to_vec(), Vec::new()).await.expect("put empty value");
    let val = store.get(b"empty").await.expect("get empty value");
    assert_eq!(val, Some(Bytes::new()), "empty value must be distinguishable from absent");
}

/// The empty key is a valid key.
pub async fn crud_empty_key_is_valid<S: KeyValueStore>(store: &S) {
    store.put(Vec::new(), b"v".to_vec()).await.expect("put empty key");
    let val = store.get(b"").await.expect("get empty key");
    assert_eq!(val, Some(Bytes::from("v")));
}

/// Keys are byte-level distinct: `"key"` and `"key\x00"` differ.
pub async fn crud_keys_are_byte_distinct<S: KeyValueStore>(store: &S) {
    store.put(b"key".to_vec(), b"a".to_vec()).await.expect("put key");
    store.put(b"key\x00".to_vec(), b"b".to_vec()).await.expect("put key+null");
    assert_eq!(store.get(b"key").await.expect("get key"), Some(Bytes::from("a")));
    assert_eq!(store.get(b"key\x00").await.expect("get key+null"), Some(Bytes::from("b")));
}

// ============================================================================
// Delete
// ============================================================================

/// `delete` returns the prior value; the key is absent afterwards.
pub async fn delete_returns_prior_value<S: KeyValueStore>(store: &S) {
    store.put(b"d1".to_vec(), b"old".to_vec()).await.expect("put");
    let prior = store.delete(b"d1").await.expect("delete");
    assert_eq!(prior, Some(Bytes::from("old")));
    assert_eq!(store.get(b"d1").await.expect("get after delete"), None);
    assert_eq!(store.delete(b"d1").await.expect("second delete"), None);
}

/// `delete` of a key that was never written returns `Ok(None)`.
pub async fn delete_missing_returns_none<S: KeyValueStore>(store: &S) {
    let prior = store.delete(b"ghost").await;
    assert!(matches!(prior, Ok(None)), "delete of missing key should return None: {prior:?}");
}

/// `delete` of an empty value returns it as present-and-empty.
pub async fn delete_returns_empty_value<S: KeyValueStore>(store: &S) {
    store.put(b"d2".to_vec(), Vec::new()).await.expect("put empty");
    assert_eq!(store.delete(b"d2").await.expect("delete"), Some(Bytes::new()));
}

// ============================================================================
// Bulk
// ============================================================================

/// Within one `put_all`, the last occurrence of a key wins.
pub async fn put_all_last_occurrence_wins<S: KeyValueStore>(store: &S) {
    store
        .put_all(vec![
            KeyValue::new("a", "1"),
            KeyValue::new("b", "2"),
            KeyValue::new("a", "3"),
            KeyValue::new("c", ""),
        ])
        .await
        .expect("put_all");

    assert_eq!(store.get(b"a").await.expect("get a"), Some(Bytes::from("3")));
    assert_eq!(store.get(b"b").await.expect("get b"), Some(Bytes::from("2")));
    assert_eq!(store.get(b"c").await.expect("get c"), Some(Bytes::new()));
}

/// `put_all` with more entries than fit one bulk request stores them all.
pub async fn put_all_many_entries<S: KeyValueStore>(store: &S) {
    let entries: Vec<KeyValue> =
        (0..60).map(|i| KeyValue::new(make_key("bulk", i), make_tagged_value(0, i))).collect();
    store.put_all(entries).await.expect("put_all");

    for i in 0..60 {
        let val = store.get(&make_key("bulk", i)).await.expect("get");
        assert_eq!(val, Some(Bytes::from(make_tagged_value(0, i))), "entry {i}");
    }
}

/// Duplicates that straddle a bulk-request boundary still resolve to the
/// last occurrence.
pub async fn put_all_duplicates_across_chunks<S: KeyValueStore>(store: &S) {
    let mut entries: Vec<KeyValue> =
        (0..30).map(|i| KeyValue::new(make_key("dup", i), "first")).collect();
    entries.push(KeyValue::new(make_key("dup", 0), "last"));
    store.put_all(entries).await.expect("put_all");

    assert_eq!(store.get(&make_key("dup", 0)).await.expect("get"), Some(Bytes::from("last")));
    assert_eq!(store.get(&make_key("dup", 29)).await.expect("get"), Some(Bytes::from("first")));
}

/// `put_all` with no entries succeeds and writes nothing.
pub async fn put_all_empty_is_noop<S: KeyValueStore>(store: &S) {
    store.put_all(Vec::new()).await.expect("empty put_all");
    assert_eq!(store.get(b"anything").await.expect("get"), None);
}

// ============================================================================
// Put-if-absent
// ============================================================================

/// On an absent key, `put_if_absent` inserts and returns the supplied value.
pub async fn put_if_absent_inserts_when_absent<S: KeyValueStore>(store: &S) {
    let outcome = store.put_if_absent(b"p1".to_vec(), b"mine".to_vec()).await.expect("put_if_absent");
    assert!(outcome.was_inserted());
    assert_eq!(outcome.value(), &Bytes::from("mine"));
    assert_eq!(store.get(b"p1").await.expect("get"), Some(Bytes::from("mine")));
}

/// On a present key, `put_if_absent` returns the existing value and leaves it.
pub async fn put_if_absent_keeps_existing<S: KeyValueStore>(store: &S) {
    store.put(b"p2".to_vec(), b"theirs".to_vec()).await.expect("put");
    let outcome = store.put_if_absent(b"p2".to_vec(), b"mine".to_vec()).await.expect("put_if_absent");
    assert!(!outcome.was_inserted());
    assert_eq!(outcome.into_value(), Bytes::from("theirs"));
    assert_eq!(store.get(b"p2").await.expect("get"), Some(Bytes::from("theirs")));
}

/// An existing empty value counts as present.
pub async fn put_if_absent_treats_empty_value_as_present<S: KeyValueStore>(store: &S) {
    store.put(b"p3".to_vec(), Vec::new()).await.expect("put empty");
    let outcome = store.put_if_absent(b"p3".to_vec(), b"mine".to_vec()).await.expect("put_if_absent");
    assert_eq!(outcome.value(), &Bytes::new());
    assert!(!outcome.was_inserted());
}

/// `tasks` concurrent callers race on one key; exactly one inserts and all
/// observe the same stored value.
pub async fn put_if_absent_concurrent_single_winner<S: KeyValueStore + 'static>(
    store: Arc<S>,
    tasks: usize,
) {
    let mut set = JoinSet::new();
    for task in 0..tasks {
        let store = Arc::clone(&store);
        set.spawn(async move {
            store.put_if_absent(b"race".to_vec(), make_tagged_value(task, 0)).await
        });
    }

    let mut outcomes = Vec::with_capacity(tasks);
    while let Some(joined) = set.join_next().await {
        outcomes.push(joined.expect("task should not panic").expect("put_if_absent"));
    }

    let inserted = outcomes.iter().filter(|o| o.was_inserted()).count();
    assert_eq!(inserted, 1, "exactly one caller must insert");

    let stored = store.get(b"race").await.expect("get").expect("winner stored");
    for outcome in &outcomes {
        assert_eq!(outcome.value(), &stored, "every caller observes the winning value");
    }
}

// ============================================================================
// Long keys
// ============================================================================

/// Keys far above any backend key limit can be written, read and deleted.
pub async fn long_key_roundtrip<S: KeyValueStore>(store: &S) {
    let key = make_long_key(64 * 1024, 7);
    store.put(key.clone(), b"big-key".to_vec()).await.expect("put long key");
    assert_eq!(store.get(&key).await.expect("get long key"), Some(Bytes::from("big-key")));
    assert_eq!(store.delete(&key).await.expect("delete long key"), Some(Bytes::from("big-key")));
    assert_eq!(store.get(&key).await.expect("get after delete"), None);
}

/// Long keys sharing a prefix stay distinct.
pub async fn long_keys_stay_distinct<S: KeyValueStore>(store: &S) {
    let a = make_long_key(4096, 1);
    let b = make_long_key(4096, 2);
    store.put(a.clone(), b"a".to_vec()).await.expect("put a");
    store.put(b.clone(), b"b".to_vec()).await.expect("put b");
    assert_eq!(store.get(&a).await.expect("get a"), Some(Bytes::from("a")));
    assert_eq!(store.get(&b).await.expect("get b"), Some(Bytes::from("b")));
}

/// Bulk writes and put-if-absent normalize long keys the same way as `put`.
pub async fn long_keys_consistent_across_operations<S: KeyValueStore>(store: &S) {
    let key = make_long_key(5000, 3);
    store.put_all(vec![KeyValue::new(key.clone(), "bulk")]).await.expect("put_all long key");
    let outcome = store.put_if_absent(key.clone(), b"late".to_vec()).await.expect("put_if_absent");
    assert_eq!(outcome.value(), &Bytes::from("bulk"));
    assert_eq!(store.get(&key).await.expect("get"), Some(Bytes::from("bulk")));
}

// ============================================================================
// Unsupported
// ============================================================================

/// `range` fails with `Unsupported`.
pub async fn range_is_unsupported<S: KeyValueStore>(store: &S) {
    assert_unsupported!(store.range(b"a", b"z").await);
}

/// `all` fails with `Unsupported`.
pub async fn all_is_unsupported<S: KeyValueStore>(store: &S) {
    assert_unsupported!(store.all().await);
}

// ============================================================================
// Lifecycle
// ============================================================================

/// After `close`, the store reports closed and rejects key-value operations.
/// A second `close` is a no-op.
pub async fn closed_store_rejects_operations<S: KeyValueStore>(store: &S) {
    assert!(store.is_open(), "store under test must start open");
    store.close().await.expect("close");
    store.close().await.expect("second close is a no-op");

    assert!(!store.is_open());
    assert_not_open!(store.get(b"k").await);
    assert_not_open!(store.put(b"k".to_vec(), b"v".to_vec()).await);
    assert_not_open!(store.put_all(vec![KeyValue::new("k", "v")]).await);
    assert_not_open!(store.put_if_absent(b"k".to_vec(), b"v".to_vec()).await);
    assert_not_open!(store.delete(b"k").await);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hashing::HashingStore, memory::MemoryStore, KeyCodec};

    fn store() -> HashingStore<MemoryStore> {
        HashingStore::new(MemoryStore::new("conformance"), KeyCodec::default())
    }

    macro_rules! conformance_tests {
        ($($name:ident),* $(,)?) => {
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(&store()).await;
                }
            )*
        };
    }

    conformance_tests!(
        crud_get_returns_none_for_missing_key,
        crud_put_then_get_returns_value,
        crud_put_overwrites_existing,
        crud_empty_value_is_not_absent,
        crud_empty_key_is_valid,
        crud_keys_are_byte_distinct,
        delete_returns_prior_value,
        delete_missing_returns_none,
        delete_returns_empty_value,
        put_all_last_occurrence_wins,
        put_all_many_entries,
        put_all_duplicates_across_chunks,
        put_all_empty_is_noop,
        put_if_absent_inserts_when_absent,
        put_if_absent_keeps_existing,
        put_if_absent_treats_empty_value_as_present,
        long_key_roundtrip,
        long_keys_stay_distinct,
        long_keys_consistent_across_operations,
        range_is_unsupported,
        all_is_unsupported,
        closed_store_rejects_operations,
    );

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn put_if_absent_concurrent_single_winner() {
        super::put_if_absent_concurrent_single_winner(Arc::new(store()), 16).await;
    }
}
