use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::record::{AssetKey, StoredAssetRecord};
use crate::error::StoreError;

/// Storage usage as reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaEstimate {
    pub usage_bytes: u64,
    pub quota_bytes: Option<u64>,
}

impl QuotaEstimate {
    /// Used share of the quota in percent, when a quota is known
    pub fn usage_percent(&self) -> Option<f64> {
        self.quota_bytes
            .filter(|quota| *quota > 0)
            .map(|quota| self.usage_bytes as f64 / quota as f64 * 100.0)
    }
}

/// Persistent key-value backing for the local asset store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Prepare the backend; called once before any other operation
    async fn open(&self) -> Result<(), StoreError>;

    /// Insert a new record. Fails with `KeyExists` instead of overwriting.
    async fn put(&self, key: &AssetKey, record: &StoredAssetRecord) -> Result<(), StoreError>;

    async fn get(&self, key: &AssetKey) -> Result<Option<StoredAssetRecord>, StoreError>;

    async fn get_all(&self) -> Result<Vec<StoredAssetRecord>, StoreError>;

    async fn get_all_keys(&self) -> Result<Vec<AssetKey>, StoreError>;

    /// Returns whether a record was removed
    async fn delete(&self, key: &AssetKey) -> Result<bool, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;

    async fn quota(&self) -> Result<QuotaEstimate, StoreError>;
}

/// In-memory backend with optional write failure injection
pub struct MemoryKvStore {
    records: RwLock<BTreeMap<AssetKey, StoredAssetRecord>>,
    quota_bytes: Option<u64>,
    fail_writes: AtomicBool,
    open_count: AtomicU64,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_quota(None)
    }

    pub fn with_quota(quota_bytes: Option<u64>) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            quota_bytes,
            fail_writes: AtomicBool::new(false),
            open_count: AtomicU64::new(0),
        }
    }

    /// Make every following `put` fail with `WriteFailed`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn open(&self) -> Result<(), StoreError> {
        self.open_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn put(&self, key: &AssetKey, record: &StoredAssetRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::WriteFailed {
                key: key.to_string(),
                details: "write failure injected".to_string(),
            });
        }

        let mut records = self.records.write();
        if records.contains_key(key) {
            return Err(StoreError::KeyExists {
                key: key.to_string(),
            });
        }
        records.insert(key.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, key: &AssetKey) -> Result<Option<StoredAssetRecord>, StoreError> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn get_all(&self) -> Result<Vec<StoredAssetRecord>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn get_all_keys(&self) -> Result<Vec<AssetKey>, StoreError> {
        Ok(self.records.read().keys().cloned().collect())
    }

    async fn delete(&self, key: &AssetKey) -> Result<bool, StoreError> {
        Ok(self.records.write().remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.write().clear();
        Ok(())
    }

    async fn quota(&self) -> Result<QuotaEstimate, StoreError> {
        let usage_bytes = self.records.read().values().map(|r| r.byte_size).sum();
        Ok(QuotaEstimate {
            usage_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn record(user: &str, pub_id: &str, ts: i64) -> StoredAssetRecord {
        StoredAssetRecord {
            user_id: user.to_string(),
            pub_id: pub_id.to_string(),
            pub_name: format!("{} pub", pub_id),
            captured_at_ms: ts,
            blob: Bytes::from(vec![7u8; 10]),
            byte_size: 10,
            mime_type: "image/jpeg".to_string(),
            width: 600,
            height: 600,
        }
    }

    #[tokio::test]
    async fn test_put_never_overwrites() {
        let store = MemoryKvStore::new();
        let first = record("u", "p", 1);
        store.put(&first.key(), &first).await.unwrap();

        let mut second = record("u", "p", 1);
        second.pub_name = "renamed".to_string();
        assert!(matches!(
            store.put(&second.key(), &second).await,
            Err(StoreError::KeyExists { .. })
        ));
        assert_eq!(
            store.get(&first.key()).await.unwrap().unwrap().pub_name,
            "p pub"
        );
    }

    #[tokio::test]
    async fn test_quota_reports_usage() {
        let store = MemoryKvStore::with_quota(Some(100));
        for ts in 0..3 {
            let r = record("u", "p", ts);
            store.put(&r.key(), &r).await.unwrap();
        }
        let quota = store.quota().await.unwrap();
        assert_eq!(quota.usage_bytes, 30);
        assert_eq!(quota.usage_percent(), Some(30.0));

        assert!(store.delete(&record("u", "p", 1).key()).await.unwrap());
        assert!(!store.delete(&record("u", "p", 1).key()).await.unwrap());
        assert_eq!(store.get_all_keys().await.unwrap().len(), 2);

        store.clear().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = MemoryKvStore::new();
        store.set_fail_writes(true);
        let r = record("u", "p", 1);
        assert!(matches!(
            store.put(&r.key(), &r).await,
            Err(StoreError::WriteFailed { .. })
        ));
        assert!(store.is_empty());
    }
}
