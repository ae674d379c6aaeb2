use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::debug;

use crate::analyzer::FrameAnalyzer;
use crate::config::AnalysisProfile;
use crate::error::DetectionError;
use crate::frame::FrameData;
use crate::gates::{ConfidenceThresholds, ConfidenceTier};
use crate::versioning::EncodedAsset;

/// Answer from a detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionVerdict {
    pub detected: bool,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub quality_metrics: BTreeMap<String, f64>,
}

impl DetectionVerdict {
    pub fn positive(confidence: f64) -> Self {
        Self {
            detected: true,
            confidence,
            quality_metrics: BTreeMap::new(),
        }
    }

    pub fn negative(confidence: f64) -> Self {
        Self {
            detected: false,
            confidence,
            quality_metrics: BTreeMap::new(),
        }
    }
}

/// "Is this a carpet" check on the encoded analysis variant.
///
/// Implementations may take arbitrarily long; callers treat an error the
/// same way as a negative verdict.
#[async_trait]
pub trait CarpetDetector: Send + Sync {
    async fn detect(&self, image: &EncodedAsset) -> Result<DetectionVerdict, DetectionError>;
}

/// Local stand-in for a remote detector.
///
/// Re-analyses the image and reports a match when the pattern metrics reach
/// the configured confidence tier.
pub struct HeuristicDetector {
    profile: AnalysisProfile,
    thresholds: ConfidenceThresholds,
    min_tier: ConfidenceTier,
}

impl HeuristicDetector {
    pub fn new(profile: AnalysisProfile, thresholds: ConfidenceThresholds) -> Self {
        Self {
            profile,
            thresholds,
            min_tier: ConfidenceTier::Green,
        }
    }

    pub fn with_min_tier(mut self, min_tier: ConfidenceTier) -> Self {
        self.min_tier = min_tier;
        self
    }

    fn judge(
        profile: AnalysisProfile,
        thresholds: ConfidenceThresholds,
        min_tier: ConfidenceTier,
        bytes: &[u8],
    ) -> Result<DetectionVerdict, DetectionError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| DetectionError::InvalidImage {
                details: e.to_string(),
            })?
            .to_rgb8();

        let frame = FrameData::from_rgb_image(0, SystemTime::now(), image);
        let metrics = FrameAnalyzer::new(profile)
            .analyze(&frame)
            .map_err(|e| DetectionError::InvalidImage {
                details: e.to_string(),
            })?;

        let tier = thresholds.tier(
            metrics.sharpness,
            metrics.edge_density,
            metrics.texture_complexity,
        );
        let confidence = ((metrics.sharpness / thresholds.strong_sharpness.max(1.0)
            + metrics.edge_density / thresholds.strong_edge_density.max(1.0)
            + metrics.texture_complexity / thresholds.strong_texture.max(1.0))
            / 3.0)
            .clamp(0.0, 1.0);

        let quality_metrics = BTreeMap::from([
            ("sharpness".to_string(), metrics.sharpness),
            ("contrast".to_string(), metrics.contrast),
            ("edge_density".to_string(), metrics.edge_density),
            ("texture_complexity".to_string(), metrics.texture_complexity),
            ("repetition".to_string(), metrics.repetition),
        ]);

        debug!("Heuristic detector: tier {}, confidence {:.2}", tier, confidence);
        Ok(DetectionVerdict {
            detected: tier >= min_tier,
            confidence,
            quality_metrics,
        })
    }
}

#[async_trait]
impl CarpetDetector for HeuristicDetector {
    async fn detect(&self, image: &EncodedAsset) -> Result<DetectionVerdict, DetectionError> {
        let profile = self.profile.clone();
        let thresholds = self.thresholds;
        let min_tier = self.min_tier;
        let bytes = image.bytes.clone();

        tokio::task::spawn_blocking(move || Self::judge(profile, thresholds, min_tier, &bytes))
            .await
            .map_err(|e| DetectionError::Unavailable {
                details: format!("detector task failed: {}", e),
            })?
    }
}

/// Scripted detector: a queue of answers, then a default one
pub struct StaticDetector {
    script: Mutex<Vec<Result<DetectionVerdict, DetectionError>>>,
    default: Result<DetectionVerdict, DetectionError>,
    delay: Option<Duration>,
    calls: AtomicU64,
}

impl StaticDetector {
    pub fn always(verdict: DetectionVerdict) -> Self {
        Self::with_default(Ok(verdict))
    }

    pub fn failing(error: DetectionError) -> Self {
        Self::with_default(Err(error))
    }

    fn with_default(default: Result<DetectionVerdict, DetectionError>) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            default,
            delay: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Answers returned before the default, in order
    pub fn then(self, answers: Vec<Result<DetectionVerdict, DetectionError>>) -> Self {
        *self.script.lock() = answers.into_iter().rev().collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CarpetDetector for StaticDetector {
    async fn detect(&self, _image: &EncodedAsset) -> Result<DetectionVerdict, DetectionError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().pop();
        scripted.unwrap_or_else(|| self.default.clone())
    }
}
