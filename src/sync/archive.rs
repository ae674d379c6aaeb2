use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SyncError;

/// Durable blob storage addressed by generated paths
#[async_trait]
pub trait BlobArchive: Send + Sync {
    /// Store `bytes` at `path` and return a retrievable reference
    async fn upload(&self, path: &str, bytes: Bytes, mime_type: &str) -> Result<String, SyncError>;
}

/// Records which archived asset belongs to which venue
#[async_trait]
pub trait VenueRegistry: Send + Sync {
    async fn archived_asset(&self, venue_id: &str) -> Result<Option<String>, SyncError>;

    async fn record_archive(&self, venue_id: &str, reference: &str) -> Result<(), SyncError>;
}

/// Archive rooted in a local directory (or a mounted bucket)
pub struct FsBlobArchive {
    root: PathBuf,
    uploads: AtomicU64,
}

impl FsBlobArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            uploads: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlobArchive for FsBlobArchive {
    async fn upload(&self, path: &str, bytes: Bytes, mime_type: &str) -> Result<String, SyncError> {
        let failed = |details: String| SyncError::UploadFailed {
            path: path.to_string(),
            details,
        };

        if path.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(failed("path must be relative without empty or '..' parts".to_string()));
        }

        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| failed(e.to_string()))?;
        }

        let tmp = target.with_extension("part");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| failed(e.to_string()))?;
        fs::rename(&tmp, &target)
            .await
            .map_err(|e| failed(e.to_string()))?;

        self.uploads.fetch_add(1, Ordering::Relaxed);
        debug!("Archived {} bytes of {} at {}", bytes.len(), mime_type, target.display());
        Ok(target.display().to_string())
    }
}

/// In-memory registry with optional failure injection
#[derive(Default)]
pub struct MemoryVenueRegistry {
    archives: RwLock<HashMap<String, String>>,
    fail_lookups: AtomicBool,
    fail_records: AtomicBool,
}

impl MemoryVenueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_records(&self, fail: bool) {
        self.fail_records.store(fail, Ordering::Relaxed);
    }

    pub fn get(&self, venue_id: &str) -> Option<String> {
        self.archives.read().get(venue_id).cloned()
    }
}

#[async_trait]
impl VenueRegistry for MemoryVenueRegistry {
    async fn archived_asset(&self, venue_id: &str) -> Result<Option<String>, SyncError> {
        if self.fail_lookups.load(Ordering::Relaxed) {
            return Err(SyncError::Registry {
                details: "lookup failure injected".to_string(),
            });
        }
        Ok(self.get(venue_id))
    }

    async fn record_archive(&self, venue_id: &str, reference: &str) -> Result<(), SyncError> {
        if self.fail_records.load(Ordering::Relaxed) {
            return Err(SyncError::Registry {
                details: "record failure injected".to_string(),
            });
        }
        self.archives
            .write()
            .insert(venue_id.to_string(), reference.to_string());
        Ok(())
    }
}

/// Registry persisted as one JSON object `{venue_id: reference}`
pub struct JsonVenueRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonVenueRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<HashMap<String, String>, SyncError> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| SyncError::Registry {
                details: format!("{}: {}", self.path.display(), e),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(SyncError::Registry {
                details: format!("{}: {}", self.path.display(), e),
            }),
        }
    }
}

#[async_trait]
impl VenueRegistry for JsonVenueRegistry {
    async fn archived_asset(&self, venue_id: &str) -> Result<Option<String>, SyncError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(venue_id))
    }

    async fn record_archive(&self, venue_id: &str, reference: &str) -> Result<(), SyncError> {
        let _guard = self.lock.lock().await;
        let mut archives = self.load().await?;
        archives.insert(venue_id.to_string(), reference.to_string());

        let registry_error = |e: &dyn std::fmt::Display| SyncError::Registry {
            details: format!("{}: {}", self.path.display(), e),
        };
        let json = serde_json::to_vec_pretty(&archives).map_err(|e| registry_error(&e))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| registry_error(&e))?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).await.map_err(|e| registry_error(&e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| registry_error(&e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_archive_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsBlobArchive::new(dir.path());

        let reference = archive
            .upload("anchor/1700.jpg", Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();

        assert_eq!(std::fs::read(&reference).unwrap(), b"jpeg");
        assert!(reference.ends_with("1700.jpg"));
        assert_eq!(archive.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_fs_archive_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsBlobArchive::new(dir.path());
        for path in ["../x.jpg", "a//b.jpg", "/abs.jpg"] {
            assert!(matches!(
                archive.upload(path, Bytes::new(), "image/jpeg").await,
                Err(SyncError::UploadFailed { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_json_registry_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("venues.json");

        let registry = JsonVenueRegistry::new(&path);
        assert_eq!(registry.archived_asset("anchor").await.unwrap(), None);
        registry.record_archive("anchor", "ref-1").await.unwrap();

        let reopened = JsonVenueRegistry::new(&path);
        assert_eq!(
            reopened.archived_asset("anchor").await.unwrap(),
            Some("ref-1".to_string())
        );
        assert_eq!(reopened.archived_asset("swan").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_registry_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("venues.json");
        std::fs::write(&path, b"[oops").unwrap();

        let registry = JsonVenueRegistry::new(&path);
        assert!(matches!(
            registry.archived_asset("anchor").await,
            Err(SyncError::Registry { .. })
        ));
    }
}
