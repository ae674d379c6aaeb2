use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{KeyValueStore, QuotaEstimate};
use super::record::{AssetKey, StoredAssetRecord};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct IndexEntry {
    stem: String,
    /// Record without its blob
    record: StoredAssetRecord,
    disk_bytes: u64,
}

/// Directory-backed store.
///
/// Every record is a `<uuid>.bin` blob plus a `<uuid>.json` metadata file.
/// The metadata file is written last and acts as the commit marker; on open
/// the index is rebuilt from the metadata files found in the directory.
pub struct FileKvStore {
    root: PathBuf,
    quota_bytes: Option<u64>,
    index: RwLock<BTreeMap<AssetKey, IndexEntry>>,
}

fn read_failed(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::ReadFailed {
        details: format!("{}: {}", context, e),
    }
}

impl FileKvStore {
    pub fn new(root: impl Into<PathBuf>, quota_bytes: Option<u64>) -> Self {
        Self {
            root: root.into(),
            quota_bytes,
            index: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{}.bin", stem))
    }

    fn metadata_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{}.json", stem))
    }

    /// Write to a temporary name and rename into place
    async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, path).await
    }

    async fn load_entry(&self, metadata_path: &Path) -> Result<(AssetKey, IndexEntry), StoreError> {
        let stem = metadata_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| read_failed("invalid file name", metadata_path.display()))?
            .to_string();

        let json = fs::read(metadata_path)
            .await
            .map_err(|e| read_failed(&metadata_path.display().to_string(), e))?;
        let record: StoredAssetRecord = serde_json::from_slice(&json)
            .map_err(|e| read_failed(&metadata_path.display().to_string(), e))?;
        let key = record.key();
        key.validate()?;

        let blob_meta = fs::metadata(self.blob_path(&stem))
            .await
            .map_err(|e| read_failed(&format!("blob for {}", key), e))?;

        Ok((
            key,
            IndexEntry {
                stem,
                record,
                disk_bytes: blob_meta.len() + json.len() as u64,
            },
        ))
    }

    async fn read_blob(&self, entry: &IndexEntry) -> Result<StoredAssetRecord, StoreError> {
        let blob = fs::read(self.blob_path(&entry.stem))
            .await
            .map_err(|e| read_failed(&format!("blob {}", entry.stem), e))?;

        let mut record = entry.record.clone();
        record.blob = Bytes::from(blob);
        Ok(record)
    }

    async fn remove_files(&self, stem: &str) {
        // Metadata first so a crash never leaves a record without its blob
        for path in [self.metadata_path(stem), self.blob_path(stem)] {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn open(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| read_failed(&format!("create {}", self.root.display()), e))?;

        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| read_failed(&format!("read {}", self.root.display()), e))?;

        let mut index = self.index.write().await;
        index.clear();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| read_failed("read directory entry", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match self.load_entry(&path).await {
                Ok((key, entry)) => {
                    debug!("Registered stored asset {}", key);
                    index.insert(key, entry);
                }
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        info!(
            "Opened asset store at {} with {} records",
            self.root.display(),
            index.len()
        );
        Ok(())
    }

    async fn put(&self, key: &AssetKey, record: &StoredAssetRecord) -> Result<(), StoreError> {
        let mut index = self.index.write().await;
        if index.contains_key(key) {
            return Err(StoreError::KeyExists {
                key: key.to_string(),
            });
        }

        let stem = Uuid::new_v4().simple().to_string();
        let stored = record.with_key(key);
        let write_failed = |e: &dyn std::fmt::Display| StoreError::WriteFailed {
            key: key.to_string(),
            details: e.to_string(),
        };

        let json = serde_json::to_vec_pretty(&stored).map_err(|e| write_failed(&e))?;

        if let Err(e) = Self::write_atomic(&self.blob_path(&stem), &record.blob).await {
            self.remove_files(&stem).await;
            return Err(write_failed(&e));
        }
        if let Err(e) = Self::write_atomic(&self.metadata_path(&stem), &json).await {
            self.remove_files(&stem).await;
            return Err(write_failed(&e));
        }

        let mut indexed = stored;
        indexed.blob = Bytes::new();
        index.insert(
            key.clone(),
            IndexEntry {
                stem,
                record: indexed,
                disk_bytes: record.blob.len() as u64 + json.len() as u64,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &AssetKey) -> Result<Option<StoredAssetRecord>, StoreError> {
        let entry = self.index.read().await.get(key).cloned();
        match entry {
            Some(entry) => Ok(Some(self.read_blob(&entry).await?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<StoredAssetRecord>, StoreError> {
        let entries: Vec<IndexEntry> = self.index.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(entries.len());
        for entry in &entries {
            records.push(self.read_blob(entry).await?);
        }
        Ok(records)
    }

    async fn get_all_keys(&self) -> Result<Vec<AssetKey>, StoreError> {
        Ok(self.index.read().await.keys().cloned().collect())
    }

    async fn delete(&self, key: &AssetKey) -> Result<bool, StoreError> {
        let removed = self.index.write().await.remove(key);
        match removed {
            Some(entry) => {
                self.remove_files(&entry.stem).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let entries: Vec<IndexEntry> = {
            let mut index = self.index.write().await;
            let entries = index.values().cloned().collect();
            index.clear();
            entries
        };
        for entry in entries {
            self.remove_files(&entry.stem).await;
        }
        Ok(())
    }

    async fn quota(&self) -> Result<QuotaEstimate, StoreError> {
        let usage_bytes = self.index.read().await.values().map(|e| e.disk_bytes).sum();
        Ok(QuotaEstimate {
            usage_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}
