pub mod analyzer;
pub mod camera;
pub mod capture;
pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod frame;
pub mod gates;
pub mod observable;
pub mod storage;
pub mod sync;
pub mod versioning;

pub use analyzer::{AnalysisLoopStats, FrameAnalysisLoop, FrameAnalyzer, FrameMetrics, MotionHistory};
pub use camera::{FrameSource, FrameSourceBuilder, MockFrameSource, SharedFrameSource, StillImageSource};
pub use capture::{CaptureOrchestrator, CaptureOrchestratorBuilder, CaptureSession, CaptureStage};
pub use config::CarpetcamConfig;
pub use detection::{CarpetDetector, DetectionVerdict, HeuristicDetector, StaticDetector};
pub use error::{CarpetcamError, Result};
pub use events::{CheckinEvent, EventBus, EventFilter, EventReceiver};
pub use frame::{FrameData, FrameFormat};
pub use gates::{ConfidenceProfile, ConfidenceThresholds, ConfidenceTier, GateEvaluator, GateResult, Orientation};
pub use observable::Observable;
pub use storage::{AssetKey, AssetStats, FileKvStore, KeyValueStore, LocalAssetStore, MemoryKvStore, StoredAssetRecord};
pub use sync::{BlobArchive, CloudSyncCoordinator, FsBlobArchive, JsonVenueRegistry, SyncOutcome, VenueRegistry};
pub use versioning::{AssetVersionSet, AssetVersioningStrategy, EncodedAsset, EncodedFormat};
