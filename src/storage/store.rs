use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::backend::{KeyValueStore, QuotaEstimate};
use super::record::{AssetKey, StoredAssetRecord};
use crate::error::StoreError;
use crate::observable::Observable;
use crate::versioning::EncodedAsset;

/// Bounded number of timestamp bumps when a key is already taken
const MAX_KEY_ATTEMPTS: usize = 64;

/// Signed-in user's record count and size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounters {
    pub count: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FormatBreakdown {
    pub count: usize,
    pub bytes: u64,
}

/// Aggregate statistics for one user's records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetStats {
    pub count: usize,
    pub total_bytes: u64,
    /// Keyed by MIME type
    pub by_format: BTreeMap<String, FormatBreakdown>,
    /// Size the same images would take in the naive baseline encoding
    pub baseline_bytes: u64,
    pub estimated_savings_bytes: u64,
    pub quota: QuotaEstimate,
}

/// What a capture contributes to a new record
#[derive(Debug, Clone)]
pub struct NewAsset<'a> {
    pub pub_id: &'a str,
    pub pub_name: &'a str,
    pub captured_at_ms: i64,
    pub asset: &'a EncodedAsset,
}

/// Per-user, append-only store of captured assets.
///
/// Saves never overwrite: a key that is already taken is retried with a
/// later timestamp. Counters for the signed-in user are republished after
/// every mutation and read zero while signed out or uninitialized.
pub struct LocalAssetStore {
    backend: Arc<dyn KeyValueStore>,
    initialized: OnceCell<()>,
    current_user: RwLock<Option<String>>,
    counters: Observable<StoreCounters>,
    baseline_bytes_per_pixel: f64,
}

impl LocalAssetStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, baseline_bytes_per_pixel: f64) -> Self {
        Self {
            backend,
            initialized: OnceCell::new(),
            current_user: RwLock::new(None),
            counters: Observable::new(StoreCounters::default()),
            baseline_bytes_per_pixel,
        }
    }

    /// Open the backend once; concurrent callers wait for the first one
    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.initialized
            .get_or_try_init(|| async {
                info!("Initializing local asset store");
                self.backend.open().await
            })
            .await?;
        self.refresh_counters().await;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    fn ensure_initialized(&self) -> Result<(), StoreError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    pub fn current_user(&self) -> Option<String> {
        self.current_user.read().clone()
    }

    fn require_user(&self) -> Result<String, StoreError> {
        self.current_user().ok_or(StoreError::NoCurrentUser)
    }

    /// Sign a user in (or out with `None`) and republish the counters
    pub async fn set_current_user(&self, user_id: Option<String>) {
        *self.current_user.write() = user_id;
        self.refresh_counters().await;
    }

    pub fn counters(&self) -> StoreCounters {
        self.counters.get()
    }

    pub fn subscribe_counters(&self) -> tokio::sync::watch::Receiver<StoreCounters> {
        self.counters.subscribe()
    }

    /// Persist a new record for the signed-in user and return its key
    pub async fn save(&self, new: NewAsset<'_>) -> Result<AssetKey, StoreError> {
        self.ensure_initialized()?;
        let user_id = self.require_user()?;

        let mut key = AssetKey::new(user_id.as_str(), new.pub_id, new.captured_at_ms)?;
        let record = StoredAssetRecord {
            user_id,
            pub_id: new.pub_id.to_string(),
            pub_name: new.pub_name.to_string(),
            captured_at_ms: new.captured_at_ms,
            blob: new.asset.bytes.clone(),
            byte_size: new.asset.byte_size(),
            mime_type: new.asset.mime_type().to_string(),
            width: new.asset.width,
            height: new.asset.height,
        };

        for _ in 0..MAX_KEY_ATTEMPTS {
            match self.backend.put(&key, &record.with_key(&key)).await {
                Ok(()) => {
                    debug!("Stored asset {} ({} bytes)", key, record.byte_size);
                    self.refresh_counters().await;
                    return Ok(key);
                }
                Err(StoreError::KeyExists { .. }) => key = key.bumped(),
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::KeyExists {
            key: key.to_string(),
        })
    }

    pub async fn get(&self, key: &AssetKey) -> Result<Option<StoredAssetRecord>, StoreError> {
        self.ensure_initialized()?;
        self.backend.get(key).await
    }

    pub async fn all_keys(&self) -> Result<Vec<AssetKey>, StoreError> {
        self.ensure_initialized()?;
        let mut keys = self.backend.get_all_keys().await?;
        keys.sort();
        Ok(keys)
    }

    /// Signed-in user's records, newest first
    pub async fn assets_for_current_user(&self) -> Result<Vec<StoredAssetRecord>, StoreError> {
        let user_id = self.require_user()?;
        self.assets_for_user(&user_id).await
    }

    /// Records of any user, newest first
    pub async fn assets_for_user(&self, user_id: &str) -> Result<Vec<StoredAssetRecord>, StoreError> {
        self.ensure_initialized()?;
        let mut records: Vec<StoredAssetRecord> = self
            .backend
            .get_all()
            .await?
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .collect();
        records.sort_by(|a, b| b.captured_at_ms.cmp(&a.captured_at_ms));
        Ok(records)
    }

    /// Signed-in user's history at one pub, newest first
    pub async fn assets_for_pub(&self, pub_id: &str) -> Result<Vec<StoredAssetRecord>, StoreError> {
        Ok(self
            .assets_for_current_user()
            .await?
            .into_iter()
            .filter(|r| r.pub_id == pub_id)
            .collect())
    }

    /// Statistics for the signed-in user
    pub async fn stats(&self) -> Result<AssetStats, StoreError> {
        let records = self.assets_for_current_user().await?;
        let quota = self.backend.quota().await?;

        let mut by_format: BTreeMap<String, FormatBreakdown> = BTreeMap::new();
        let mut total_bytes = 0u64;
        let mut baseline = 0f64;
        for record in &records {
            total_bytes += record.byte_size;
            baseline += record.pixel_count() as f64 * self.baseline_bytes_per_pixel;

            let entry = by_format.entry(record.mime_type.clone()).or_default();
            entry.count += 1;
            entry.bytes += record.byte_size;
        }

        let baseline_bytes = baseline.round() as u64;
        Ok(AssetStats {
            count: records.len(),
            total_bytes,
            by_format,
            baseline_bytes,
            estimated_savings_bytes: baseline_bytes.saturating_sub(total_bytes),
            quota,
        })
    }

    pub async fn delete_one(&self, key: &AssetKey) -> Result<bool, StoreError> {
        self.ensure_initialized()?;
        let removed = self.backend.delete(key).await?;
        if removed {
            info!("Deleted asset {}", key);
            self.refresh_counters().await;
        }
        Ok(removed)
    }

    /// Remove the signed-in user's records only; returns how many went
    pub async fn clear_for_current_user(&self) -> Result<usize, StoreError> {
        self.ensure_initialized()?;
        let user_id = self.require_user()?;

        let keys: Vec<AssetKey> = self
            .backend
            .get_all_keys()
            .await?
            .into_iter()
            .filter(|k| k.user_id == user_id)
            .collect();

        let mut removed = 0;
        for key in &keys {
            if self.backend.delete(key).await? {
                removed += 1;
            }
        }

        info!("Cleared {} assets for user {}", removed, user_id);
        self.refresh_counters().await;
        Ok(removed)
    }

    /// Remove every record of every user
    pub async fn clear_all(&self) -> Result<usize, StoreError> {
        self.ensure_initialized()?;
        let count = self.backend.get_all_keys().await?.len();
        self.backend.clear().await?;

        warn!("Cleared all {} stored assets", count);
        self.refresh_counters().await;
        Ok(count)
    }

    async fn refresh_counters(&self) {
        let counters = match (self.is_initialized(), self.current_user()) {
            (true, Some(user_id)) => match self.backend.get_all().await {
                Ok(records) => records
                    .iter()
                    .filter(|r| r.user_id == user_id)
                    .fold(StoreCounters::default(), |mut counters, r| {
                        counters.count += 1;
                        counters.total_bytes += r.byte_size;
                        counters
                    }),
                Err(e) => {
                    warn!("Failed to refresh store counters: {}", e);
                    StoreCounters::default()
                }
            },
            _ => StoreCounters::default(),
        };

        self.counters.update(|current| {
            let changed = *current != counters;
            *current = counters;
            changed
        });
    }
}
