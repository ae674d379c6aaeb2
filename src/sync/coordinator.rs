use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::archive::{BlobArchive, VenueRegistry};
use crate::events::{CheckinEvent, EventBus};
use crate::versioning::EncodedAsset;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Disabled,
    /// The venue already holds an archived asset
    AlreadyArchived(String),
    /// Another sync for the same venue is running
    InFlight,
}

/// Result of one sync attempt; never surfaced as a session failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncOutcome {
    Uploaded {
        reference: String,
        /// Whether the venue association was written
        recorded: bool,
    },
    Skipped(SkipReason),
    Failed(String),
}

/// Removes the venue from the in-flight set when the attempt ends
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    venue_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.venue_id);
    }
}

/// Best-effort, idempotent upload of archive variants.
///
/// Called only after the local save succeeded. A venue that already has an
/// archived asset is skipped; failures are logged and reported as events
/// but never propagate.
pub struct CloudSyncCoordinator {
    archive: Arc<dyn BlobArchive>,
    registry: Arc<dyn VenueRegistry>,
    event_bus: Option<Arc<EventBus>>,
    enabled: bool,
    in_flight: Mutex<HashSet<String>>,
}

impl CloudSyncCoordinator {
    pub fn new(archive: Arc<dyn BlobArchive>, registry: Arc<dyn VenueRegistry>) -> Self {
        Self {
            archive,
            registry,
            event_bus: None,
            enabled: true,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Archive path for a venue's capture: `<venue>/<timestamp>.<ext>`
    pub fn archive_path(venue_id: &str, captured_at_ms: i64, asset: &EncodedAsset) -> String {
        format!("{}/{}.{}", venue_id, captured_at_ms, asset.format.extension())
    }

    pub async fn sync_after_local_save(
        &self,
        archive: &EncodedAsset,
        venue_id: &str,
        captured_at_ms: i64,
    ) -> SyncOutcome {
        let outcome = self.run(archive, venue_id, captured_at_ms).await;
        self.report(venue_id, &outcome).await;
        outcome
    }

    /// Fire-and-forget variant; the handle may be dropped
    pub fn spawn_after_local_save(
        self: &Arc<Self>,
        archive: EncodedAsset,
        venue_id: String,
        captured_at_ms: i64,
    ) -> JoinHandle<SyncOutcome> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator
                .sync_after_local_save(&archive, &venue_id, captured_at_ms)
                .await
        })
    }

    async fn run(&self, archive: &EncodedAsset, venue_id: &str, captured_at_ms: i64) -> SyncOutcome {
        if !self.enabled {
            return SyncOutcome::Skipped(SkipReason::Disabled);
        }

        if !self.in_flight.lock().insert(venue_id.to_string()) {
            debug!("Archive sync for {} already running", venue_id);
            return SyncOutcome::Skipped(SkipReason::InFlight);
        }
        let _in_flight = InFlight {
            set: &self.in_flight,
            venue_id: venue_id.to_string(),
        };

        match self.registry.archived_asset(venue_id).await {
            Ok(Some(existing)) => {
                return SyncOutcome::Skipped(SkipReason::AlreadyArchived(existing));
            }
            Ok(None) => {}
            Err(e) => return SyncOutcome::Failed(e.to_string()),
        }

        let path = Self::archive_path(venue_id, captured_at_ms, archive);
        let reference = match self
            .archive
            .upload(&path, archive.bytes.clone(), archive.mime_type())
            .await
        {
            Ok(reference) => reference,
            Err(e) => return SyncOutcome::Failed(e.to_string()),
        };

        let recorded = match self.registry.record_archive(venue_id, &reference).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Archived {} but could not record it for {}: {}",
                    reference, venue_id, e
                );
                false
            }
        };

        SyncOutcome::Uploaded {
            reference,
            recorded,
        }
    }

    async fn report(&self, venue_id: &str, outcome: &SyncOutcome) {
        let event = match outcome {
            SyncOutcome::Uploaded { reference, .. } => {
                info!("Archived asset for {} at {}", venue_id, reference);
                CheckinEvent::ArchiveSynced {
                    venue_id: venue_id.to_string(),
                    reference: reference.clone(),
                }
            }
            SyncOutcome::Skipped(reason) => {
                debug!("Archive sync for {} skipped: {:?}", venue_id, reason);
                CheckinEvent::ArchiveSkipped {
                    venue_id: venue_id.to_string(),
                    reason: format!("{:?}", reason),
                }
            }
            SyncOutcome::Failed(error) => {
                warn!("Archive sync for {} failed: {}", venue_id, error);
                CheckinEvent::ArchiveFailed {
                    venue_id: venue_id.to_string(),
                    error: error.clone(),
                }
            }
        };

        if let Some(event_bus) = &self.event_bus {
            let _ = event_bus.publish(event).await;
        }
    }
}
