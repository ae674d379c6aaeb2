use serde::{Deserialize, Serialize};

use crate::analyzer::FrameMetrics;
use crate::config::GateConfig;

/// Latest device tilt reading in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    /// Front-to-back tilt; 0 when the device lies flat
    pub beta: f64,
    /// Left-to-right tilt
    pub gamma: f64,
}

impl Orientation {
    pub fn new(beta: f64, gamma: f64) -> Self {
        Self { beta, gamma }
    }
}

/// Coarse likelihood that the frame shows a patterned floor covering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Red,
    Yellow,
    Green,
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConfidenceTier::Red => "red",
            ConfidenceTier::Yellow => "yellow",
            ConfidenceTier::Green => "green",
        };
        f.write_str(name)
    }
}

/// Threshold set behind the confidence tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub strong_sharpness: f64,
    pub strong_edge_density: f64,
    pub strong_texture: f64,
    /// Texture alone above this bar is enough for green
    pub texture_only: f64,
    pub weak_sharpness: f64,
    pub weak_edge_density: f64,
    pub weak_texture: f64,
}

impl ConfidenceThresholds {
    /// Canonical set
    pub const STANDARD: ConfidenceThresholds = ConfidenceThresholds {
        strong_sharpness: 25.0,
        strong_edge_density: 15.0,
        strong_texture: 20.0,
        texture_only: 45.0,
        weak_sharpness: 10.0,
        weak_edge_density: 5.0,
        weak_texture: 8.0,
    };

    /// Looser set for dim venues and low-end cameras
    pub const PERMISSIVE: ConfidenceThresholds = ConfidenceThresholds {
        strong_sharpness: 18.0,
        strong_edge_density: 10.0,
        strong_texture: 14.0,
        texture_only: 35.0,
        weak_sharpness: 6.0,
        weak_edge_density: 3.0,
        weak_texture: 5.0,
    };

    /// Each weak floor must sit at or below its strong threshold
    pub fn validate(&self) -> Result<(), String> {
        let pairs = [
            ("sharpness", self.weak_sharpness, self.strong_sharpness),
            ("edge_density", self.weak_edge_density, self.strong_edge_density),
            ("texture", self.weak_texture, self.strong_texture),
        ];
        for (name, weak, strong) in pairs {
            if weak > strong {
                return Err(format!(
                    "weak {} floor {} exceeds strong threshold {}",
                    name, weak, strong
                ));
            }
        }
        if self.texture_only < self.strong_texture {
            return Err("texture_only must be at least strong_texture".to_string());
        }
        Ok(())
    }

    pub fn tier(&self, sharpness: f64, edge_density: f64, texture: f64) -> ConfidenceTier {
        let strong = [
            sharpness >= self.strong_sharpness,
            edge_density >= self.strong_edge_density,
            texture >= self.strong_texture,
        ]
        .iter()
        .filter(|cleared| **cleared)
        .count();

        if strong >= 2 || texture >= self.texture_only {
            ConfidenceTier::Green
        } else if sharpness < self.weak_sharpness
            && edge_density < self.weak_edge_density
            && texture < self.weak_texture
        {
            ConfidenceTier::Red
        } else {
            ConfidenceTier::Yellow
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceProfile {
    #[default]
    Standard,
    Permissive,
    Custom(ConfidenceThresholds),
}

impl ConfidenceProfile {
    pub fn thresholds(&self) -> ConfidenceThresholds {
        match self {
            ConfidenceProfile::Standard => ConfidenceThresholds::STANDARD,
            ConfidenceProfile::Permissive => ConfidenceThresholds::PERMISSIVE,
            ConfidenceProfile::Custom(thresholds) => *thresholds,
        }
    }
}

/// Readiness gates for one metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub device_oriented: bool,
    pub is_stable: bool,
    pub good_sharpness: bool,
    pub good_contrast: bool,
    pub low_motion: bool,
    pub has_edges: bool,
    pub has_texture: bool,
    pub confidence_tier: ConfidenceTier,
}

impl GateResult {
    /// Result before any frame has been analysed
    pub fn not_ready() -> Self {
        Self {
            device_oriented: false,
            is_stable: false,
            good_sharpness: false,
            good_contrast: false,
            low_motion: false,
            has_edges: false,
            has_texture: false,
            confidence_tier: ConfidenceTier::Red,
        }
    }

    pub fn all_gates_passed(&self) -> bool {
        self.device_oriented
            && self.is_stable
            && self.good_sharpness
            && self.good_contrast
            && self.low_motion
            && self.has_edges
            && self.has_texture
    }

    /// Names of the gates currently failing, for hints in the UI
    pub fn failing_gates(&self) -> Vec<&'static str> {
        [
            ("device_oriented", self.device_oriented),
            ("is_stable", self.is_stable),
            ("good_sharpness", self.good_sharpness),
            ("good_contrast", self.good_contrast),
            ("low_motion", self.low_motion),
            ("has_edges", self.has_edges),
            ("has_texture", self.has_texture),
        ]
        .into_iter()
        .filter(|(_, passed)| !passed)
        .map(|(name, _)| name)
        .collect()
    }
}

/// Stateless mapping from metrics and tilt to gates
#[derive(Debug, Clone)]
pub struct GateEvaluator {
    config: GateConfig,
    thresholds: ConfidenceThresholds,
}

impl GateEvaluator {
    pub fn new(config: GateConfig) -> Self {
        let thresholds = config.confidence_thresholds();
        Self { config, thresholds }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &ConfidenceThresholds {
        &self.thresholds
    }

    pub fn evaluate(&self, metrics: &FrameMetrics, orientation: Option<Orientation>) -> GateResult {
        let device_oriented = match orientation {
            Some(o) => o.beta.abs() < self.config.max_tilt_degrees,
            None => !self.config.require_orientation,
        };

        GateResult {
            device_oriented,
            is_stable: metrics.is_stable,
            good_sharpness: metrics.sharpness >= self.config.min_sharpness,
            good_contrast: metrics.contrast >= self.config.min_contrast,
            low_motion: metrics.motion_level < self.config.max_motion,
            has_edges: metrics.edge_density >= self.config.min_edge_density,
            has_texture: metrics.texture_complexity >= self.config.min_texture,
            confidence_tier: self.thresholds.tier(
                metrics.sharpness,
                metrics.edge_density,
                metrics.texture_complexity,
            ),
        }
    }

    /// Evaluate an optional snapshot; no metrics means nothing passes
    pub fn evaluate_latest(
        &self,
        metrics: Option<&FrameMetrics>,
        orientation: Option<Orientation>,
    ) -> GateResult {
        match metrics {
            Some(metrics) => self.evaluate(metrics, orientation),
            None => GateResult::not_ready(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_metrics() -> FrameMetrics {
        FrameMetrics {
            brightness: 120.0,
            contrast: 70.0,
            sharpness: 40.0,
            color_variance: 900.0,
            saturation: 30.0,
            edge_density: 25.0,
            texture_complexity: 35.0,
            repetition: 40.0,
            dominant_colors: Vec::new(),
            motion_level: 2.0,
            is_stable: true,
            analysis_duration_ms: 3,
            frame_dimensions: (640, 480),
            captured_at_ms: 0,
        }
    }

    fn evaluator() -> GateEvaluator {
        GateEvaluator::new(GateConfig::default())
    }

    #[test]
    fn test_all_gates_pass_for_good_frame() {
        let result = evaluator().evaluate(&good_metrics(), Some(Orientation::new(5.0, 0.0)));
        assert!(result.all_gates_passed());
        assert_eq!(result.confidence_tier, ConfidenceTier::Green);
        assert!(result.failing_gates().is_empty());
    }

    #[test]
    fn test_steep_tilt_blocks_all_gates() {
        let result = evaluator().evaluate(&good_metrics(), Some(Orientation::new(60.0, 0.0)));
        assert!(!result.device_oriented);
        assert!(!result.all_gates_passed());
        assert_eq!(result.failing_gates(), vec!["device_oriented"]);

        let result = evaluator().evaluate(&good_metrics(), Some(Orientation::new(-60.0, 0.0)));
        assert!(!result.device_oriented);
    }

    #[test]
    fn test_missing_orientation() {
        let result = evaluator().evaluate(&good_metrics(), None);
        assert!(!result.device_oriented);

        let relaxed = GateEvaluator::new(GateConfig {
            require_orientation: false,
            ..GateConfig::default()
        });
        assert!(relaxed.evaluate(&good_metrics(), None).device_oriented);
    }

    #[test]
    fn test_unstable_frame_fails() {
        let mut metrics = good_metrics();
        metrics.is_stable = false;
        let result = evaluator().evaluate(&metrics, Some(Orientation::new(0.0, 0.0)));
        assert!(!result.all_gates_passed());
    }

    #[test]
    fn test_no_metrics_is_not_ready() {
        let result = evaluator().evaluate_latest(None, Some(Orientation::new(0.0, 0.0)));
        assert_eq!(result, GateResult::not_ready());
        assert!(!result.all_gates_passed());
    }

    #[test]
    fn test_tier_red_only_when_all_below_floor() {
        let t = ConfidenceThresholds::STANDARD;
        assert_eq!(t.tier(5.0, 2.0, 4.0), ConfidenceTier::Red);
        assert_eq!(t.tier(11.0, 2.0, 4.0), ConfidenceTier::Yellow);
        assert_eq!(t.tier(5.0, 6.0, 4.0), ConfidenceTier::Yellow);
        assert_eq!(t.tier(5.0, 2.0, 9.0), ConfidenceTier::Yellow);
    }

    #[test]
    fn test_tier_green_rules() {
        let t = ConfidenceThresholds::STANDARD;
        assert_eq!(t.tier(30.0, 20.0, 0.0), ConfidenceTier::Green);
        assert_eq!(t.tier(0.0, 20.0, 25.0), ConfidenceTier::Green);
        assert_eq!(t.tier(0.0, 0.0, 50.0), ConfidenceTier::Green);
        assert_eq!(t.tier(30.0, 0.0, 0.0), ConfidenceTier::Yellow);
    }

    #[test]
    fn test_profiles_differ() {
        let standard = ConfidenceThresholds::STANDARD;
        let permissive = ConfidenceThresholds::PERMISSIVE;
        assert_eq!(standard.tier(20.0, 12.0, 10.0), ConfidenceTier::Yellow);
        assert_eq!(permissive.tier(20.0, 12.0, 10.0), ConfidenceTier::Green);
        assert!(standard.validate().is_ok());
        assert!(permissive.validate().is_ok());
    }

    #[test]
    fn test_raising_one_metric_never_lowers_tier() {
        for thresholds in [ConfidenceThresholds::STANDARD, ConfidenceThresholds::PERMISSIVE] {
            let levels = [0.0, 4.0, 7.0, 12.0, 16.0, 22.0, 30.0, 50.0, 100.0];
            for &s in &levels {
                for &e in &levels {
                    for &x in &levels {
                        let base = thresholds.tier(s, e, x);
                        assert!(thresholds.tier(100.0, e, x) >= base);
                        assert!(thresholds.tier(s, 100.0, x) >= base);
                        assert!(thresholds.tier(s, e, 100.0) >= base);
                    }
                }
            }
        }
    }

    #[test]
    fn test_custom_thresholds_validation() {
        let mut custom = ConfidenceThresholds::STANDARD;
        custom.weak_texture = 50.0;
        assert!(custom.validate().is_err());
    }
}
