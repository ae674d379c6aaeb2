use super::*;
use crate::error::StoreError;
use crate::versioning::{EncodedAsset, EncodedFormat};
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;

fn asset(size: usize, format: EncodedFormat) -> EncodedAsset {
    EncodedAsset {
        bytes: Bytes::from(vec![0xAB; size]),
        format,
        width: 600,
        height: 600,
        fell_back: false,
    }
}

fn new_asset<'a>(pub_id: &'a str, ts: i64, asset: &'a EncodedAsset) -> NewAsset<'a> {
    NewAsset {
        pub_id,
        pub_name: "The Red Lion",
        captured_at_ms: ts,
        asset,
    }
}

async fn signed_in_store(user: &str) -> (Arc<MemoryKvStore>, LocalAssetStore) {
    let backend = Arc::new(MemoryKvStore::new());
    let store = LocalAssetStore::new(backend.clone(), 0.35);
    store.initialize().await.unwrap();
    store.set_current_user(Some(user.to_string())).await;
    (backend, store)
}

#[tokio::test]
async fn test_third_checkin_adds_a_record() {
    let (_, store) = signed_in_store("u").await;
    let jpeg = asset(1_000, EncodedFormat::Jpeg);

    let first = store.save(new_asset("red-lion", 1_000, &jpeg)).await.unwrap();
    let second = store.save(new_asset("red-lion", 2_000, &jpeg)).await.unwrap();
    assert_eq!(store.stats().await.unwrap().count, 2);

    let third = store.save(new_asset("red-lion", 3_000, &jpeg)).await.unwrap();
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.total_bytes, 3_000);

    for key in [&first, &second, &third] {
        assert!(store.get(key).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_same_timestamp_saves_get_distinct_keys() {
    let (_, store) = signed_in_store("u").await;
    let jpeg = asset(10, EncodedFormat::Jpeg);

    let mut keys = HashSet::new();
    for _ in 0..5 {
        keys.insert(store.save(new_asset("anchor", 500, &jpeg)).await.unwrap());
    }

    assert_eq!(keys.len(), 5);
    assert_eq!(store.assets_for_pub("anchor").await.unwrap().len(), 5);
    assert_eq!(store.all_keys().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_clear_only_touches_current_user() {
    let (backend, store) = signed_in_store("alice").await;
    let jpeg = asset(10, EncodedFormat::Jpeg);

    store.save(new_asset("swan", 1, &jpeg)).await.unwrap();
    store.save(new_asset("swan", 2, &jpeg)).await.unwrap();

    store.set_current_user(Some("bob".to_string())).await;
    store.save(new_asset("swan", 3, &jpeg)).await.unwrap();

    store.set_current_user(Some("alice".to_string())).await;
    assert_eq!(store.clear_for_current_user().await.unwrap(), 2);

    assert!(store.assets_for_current_user().await.unwrap().is_empty());
    let bob = store.assets_for_user("bob").await.unwrap();
    assert_eq!(bob.len(), 1);
    assert_eq!(bob[0].user_id, "bob");
    assert_eq!(backend.len(), 1);

    assert_eq!(store.clear_all().await.unwrap(), 1);
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_counters_follow_user_and_mutations() {
    let backend = Arc::new(MemoryKvStore::new());
    let store = LocalAssetStore::new(backend, 0.35);
    assert_eq!(store.counters(), StoreCounters::default());

    store.set_current_user(Some("u".to_string())).await;
    assert_eq!(store.counters().count, 0, "uninitialized store reads zero");

    store.initialize().await.unwrap();
    let jpeg = asset(100, EncodedFormat::Jpeg);
    let key = store.save(new_asset("p", 1, &jpeg)).await.unwrap();
    store.save(new_asset("p", 2, &jpeg)).await.unwrap();
    assert_eq!(
        store.counters(),
        StoreCounters {
            count: 2,
            total_bytes: 200
        }
    );

    assert!(store.delete_one(&key).await.unwrap());
    assert!(!store.delete_one(&key).await.unwrap());
    assert_eq!(store.counters().count, 1);

    store.set_current_user(None).await;
    assert_eq!(store.counters(), StoreCounters::default());
}

#[tokio::test]
async fn test_concurrent_initialize_opens_once() {
    let backend = Arc::new(MemoryKvStore::new());
    let store = Arc::new(LocalAssetStore::new(backend.clone(), 0.35));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.initialize().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    store.initialize().await.unwrap();
    assert_eq!(backend.open_count(), 1);
}

#[tokio::test]
async fn test_operations_need_init_and_user() {
    let store = LocalAssetStore::new(Arc::new(MemoryKvStore::new()), 0.35);
    let jpeg = asset(1, EncodedFormat::Jpeg);

    assert!(matches!(
        store.save(new_asset("p", 1, &jpeg)).await,
        Err(StoreError::NotInitialized)
    ));

    store.initialize().await.unwrap();
    assert!(matches!(
        store.save(new_asset("p", 1, &jpeg)).await,
        Err(StoreError::NoCurrentUser)
    ));
    assert!(matches!(store.stats().await, Err(StoreError::NoCurrentUser)));

    store.set_current_user(Some("u".to_string())).await;
    assert!(matches!(
        store.save(new_asset("bad:id", 1, &jpeg)).await,
        Err(StoreError::InvalidKey { .. })
    ));
}

#[tokio::test]
async fn test_stats_breakdown_and_savings() {
    let (_, store) = signed_in_store("u").await;
    store
        .save(new_asset("p", 1, &asset(20_000, EncodedFormat::Jpeg)))
        .await
        .unwrap();
    store
        .save(new_asset("p", 2, &asset(10_000, EncodedFormat::WebP)))
        .await
        .unwrap();
    store
        .save(new_asset("q", 3, &asset(30_000, EncodedFormat::Jpeg)))
        .await
        .unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.by_format["image/jpeg"].count, 2);
    assert_eq!(stats.by_format["image/jpeg"].bytes, 50_000);
    assert_eq!(stats.by_format["image/webp"].count, 1);

    // 3 x 600 x 600 x 0.35
    assert_eq!(stats.baseline_bytes, 378_000);
    assert_eq!(stats.estimated_savings_bytes, 378_000 - 60_000);
    assert_eq!(stats.quota.usage_bytes, 60_000);
}

#[tokio::test]
async fn test_failed_write_leaves_no_record() {
    let (backend, store) = signed_in_store("u").await;
    backend.set_fail_writes(true);

    let result = store.save(new_asset("p", 1, &asset(5, EncodedFormat::Jpeg))).await;
    assert!(matches!(result, Err(StoreError::WriteFailed { .. })));
    assert!(backend.is_empty());
    assert_eq!(store.counters().count, 0);
}

#[tokio::test]
async fn test_file_backed_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let jpeg = asset(64, EncodedFormat::Jpeg);

    let key = {
        let store = LocalAssetStore::new(Arc::new(FileKvStore::new(dir.path(), None)), 0.35);
        store.initialize().await.unwrap();
        store.set_current_user(Some("u".to_string())).await;
        store.save(new_asset("p", 99, &jpeg)).await.unwrap()
    };

    let store = LocalAssetStore::new(Arc::new(FileKvStore::new(dir.path(), None)), 0.35);
    store.initialize().await.unwrap();
    store.set_current_user(Some("u".to_string())).await;

    let record = store.get(&key).await.unwrap().unwrap();
    assert_eq!(record.blob, jpeg.bytes);
    assert_eq!(record.mime_type, "image/jpeg");
    assert_eq!(store.counters().count, 1);

    // same timestamp after a restart still gets a fresh key
    let again = store.save(new_asset("p", 99, &jpeg)).await.unwrap();
    assert_ne!(again, key);
    assert_eq!(store.counters().count, 2);
}
