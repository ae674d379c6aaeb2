use std::sync::Arc;
use tracing::warn;

use super::orchestrator::CaptureOrchestrator;
use crate::analyzer::FrameAnalysisLoop;
use crate::camera::SharedFrameSource;
use crate::config::{AnalysisProfile, CaptureConfig, CarpetcamConfig, GateConfig, VersionsConfig};
use crate::detection::CarpetDetector;
use crate::error::{CarpetcamError, Result};
use crate::events::EventBus;
use crate::gates::GateEvaluator;
use crate::storage::LocalAssetStore;
use crate::sync::CloudSyncCoordinator;
use crate::versioning::AssetVersioningStrategy;

/// Builder for [`CaptureOrchestrator`]
pub struct CaptureOrchestratorBuilder {
    capture: CaptureConfig,
    gates: GateConfig,
    analyzer: AnalysisProfile,
    versions: VersionsConfig,
    source: Option<SharedFrameSource>,
    store: Option<Arc<LocalAssetStore>>,
    versioning: Option<AssetVersioningStrategy>,
    detector: Option<Arc<dyn CarpetDetector>>,
    sync: Option<Arc<CloudSyncCoordinator>>,
    event_bus: Option<Arc<EventBus>>,
}

impl CaptureOrchestratorBuilder {
    pub fn new() -> Self {
        let defaults = CarpetcamConfig::default();
        Self {
            capture: defaults.capture,
            gates: defaults.gates,
            analyzer: defaults.analyzer,
            versions: defaults.versions,
            source: None,
            store: None,
            versioning: None,
            detector: None,
            sync: None,
            event_bus: None,
        }
    }

    /// Take the capture, gate, analyzer and version sections from `config`
    pub fn config(mut self, config: &CarpetcamConfig) -> Self {
        self.capture = config.capture.clone();
        self.gates = config.gates.clone();
        self.analyzer = config.analyzer.clone();
        self.versions = config.versions.clone();
        self
    }

    pub fn capture_config(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    pub fn gate_config(mut self, gates: GateConfig) -> Self {
        self.gates = gates;
        self
    }

    pub fn analysis_profile(mut self, profile: AnalysisProfile) -> Self {
        self.analyzer = profile;
        self
    }

    pub fn frame_source(mut self, source: SharedFrameSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn store(mut self, store: Arc<LocalAssetStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Versioning strategy; defaults to the built-in encoder
    pub fn versioning(mut self, versioning: AssetVersioningStrategy) -> Self {
        self.versioning = Some(versioning);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn CarpetDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn cloud_sync(mut self, sync: Arc<CloudSyncCoordinator>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<CaptureOrchestrator> {
        let source = self.source.ok_or_else(|| {
            CarpetcamError::component("capture_orchestrator_builder", "Frame source is required")
        })?;

        let store = self.store.ok_or_else(|| {
            CarpetcamError::component("capture_orchestrator_builder", "Asset store is required")
        })?;

        if self.capture.poll_interval_ms == 0
            || self.capture.debounce_sample_ms == 0
            || self.capture.retry_delay_ms == 0
        {
            return Err(CarpetcamError::component(
                "capture_orchestrator_builder",
                "Capture timer intervals must be greater than 0",
            ));
        }

        if self.capture.detection_enabled && self.detector.is_none() {
            warn!("Detection is enabled but no detector was supplied; captures skip the verdict");
        }

        let analysis = FrameAnalysisLoop::new(
            self.analyzer,
            Arc::clone(&source),
            self.event_bus.clone(),
        );
        let versioning = self
            .versioning
            .unwrap_or_else(|| AssetVersioningStrategy::new(self.versions));

        Ok(CaptureOrchestrator::from_parts(
            self.capture,
            source,
            analysis,
            GateEvaluator::new(self.gates),
            versioning,
            store,
            self.sync,
            self.detector,
            self.event_bus,
        ))
    }
}

impl Default for CaptureOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
