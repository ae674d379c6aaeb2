mod archive;
mod coordinator;

pub use archive::{BlobArchive, FsBlobArchive, JsonVenueRegistry, MemoryVenueRegistry, VenueRegistry};
pub use coordinator::{CloudSyncCoordinator, SkipReason, SyncOutcome};
