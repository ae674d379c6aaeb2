use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::analyzer::{MAX_MOTION_SAMPLES, MIN_STABILITY_SAMPLES};
use crate::gates::{ConfidenceProfile, ConfidenceThresholds};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct CarpetcamConfig {
    pub camera: CameraConfig,
    pub analyzer: AnalysisProfile,
    pub gates: GateConfig,
    pub capture: CaptureConfig,
    pub versions: VersionsConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera device index (e.g., 0 for /dev/video0)
    pub index: u32,

    /// Requested resolution (width, height); the device may negotiate another
    pub resolution: (u32, u32),

    /// Frames per second
    pub fps: u32,
}

/// Frame analysis constants.
///
/// The window, stride, grid and offset values are calibrated against
/// `analysis_width` x `analysis_height`; change them together.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisProfile {
    /// Period of the analysis timer in milliseconds
    pub interval_ms: u64,

    /// Fixed analysis resolution every source frame is sampled down to
    pub analysis_width: u32,
    pub analysis_height: u32,

    /// Sobel magnitude divisor for the sharpness score
    pub sharpness_divisor: f64,

    /// Sobel magnitude above which a pixel counts as an edge
    pub edge_magnitude_threshold: f64,

    /// Side of the square texture window
    pub texture_window: u32,

    /// Step between texture windows
    pub texture_stride: u32,

    /// Pixel offsets probed for repetition
    pub repetition_offsets: Vec<[u32; 2]>,

    /// Sparse sampling step for repetition pairs
    pub repetition_sample_step: u32,

    /// Max brightness difference for a pair to count as a repeat
    pub repetition_tolerance: u8,

    /// Sampling step for colour statistics
    pub color_sample_step: u32,

    /// Quantization levels per channel for dominant colours
    pub color_levels: u8,

    /// Grid step for motion comparison
    pub motion_grid_step: u32,

    /// Gain applied to the mean absolute luma difference (0-100 scale)
    pub motion_gain: f64,

    /// Number of motion samples kept
    pub motion_history_len: usize,

    /// Minimum samples before stability is reported
    pub min_stability_samples: usize,

    /// Rolling motion average below which the frame is stable
    pub stability_threshold: f64,

    /// Retained state is dropped after this many analyses
    pub reset_after_analyses: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum |beta| tilt in degrees for the device to count as pointed down
    pub max_tilt_degrees: f64,

    /// When false a missing orientation reading passes the orientation gate
    pub require_orientation: bool,

    pub min_sharpness: f64,
    pub min_contrast: f64,
    pub min_edge_density: f64,
    pub min_texture: f64,

    /// Motion level at or above which the low-motion gate fails
    pub max_motion: f64,

    /// Threshold set used for the confidence tier
    pub confidence_profile: ConfidenceProfile,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Gate poll period while waiting for conditions
    pub poll_interval_ms: u64,

    /// How long all gates must hold before the shutter fires
    pub debounce_ms: u64,

    /// Re-check period inside the debounce window
    pub debounce_sample_ms: u64,

    /// Delay before a soft failure goes back to the camera step
    pub retry_delay_ms: u64,

    /// Whether soft failures retry automatically
    pub auto_retry: bool,

    /// Send the analysis variant to the detector before persisting
    pub detection_enabled: bool,

    /// Skip the review step and proceed as if the user confirmed
    pub auto_confirm: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatPolicy {
    /// Best format from the negotiated capability set
    Preferred,
    /// Always the universal fallback format
    Universal,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct VersionSpec {
    /// Target square edge in pixels
    pub size: u32,
    /// Encoder quality in (0, 1]
    pub quality: f32,
    pub format: FormatPolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct VersionsConfig {
    pub local: VersionSpec,
    pub analysis: VersionSpec,
    pub archive: VersionSpec,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the file-backed asset store
    pub path: String,

    /// Optional storage quota reported by the store
    pub quota_bytes: Option<u64>,

    /// Bytes per pixel of the naive baseline encoding used for savings estimates
    pub baseline_bytes_per_pixel: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Upload the archive variant after a successful local save
    pub enabled: bool,

    /// Root directory of the file-backed archive
    pub archive_path: String,

    /// JSON file recording which venue holds which archived asset
    pub registry_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SystemConfig {
    /// Event bus capacity
    pub event_bus_capacity: usize,
}

impl CarpetcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("carpetcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("capture.poll_interval_ms", default_poll_interval_ms())?
            .set_default("capture.debounce_ms", default_debounce_ms())?
            .set_default("capture.retry_delay_ms", default_retry_delay_ms())?
            .set_default("storage.path", default_storage_path())?
            .set_default("sync.archive_path", default_archive_path())?
            .set_default("system.event_bus_capacity", default_event_bus_capacity() as i64)?
            .add_source(File::with_name(&path_str).required(false))
            // CARPETCAM_CAPTURE__DEBOUNCE_MS=750
            .add_source(
                Environment::with_prefix("CARPETCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: CarpetcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        let analyzer = &self.analyzer;

        if analyzer.analysis_width < 3 || analyzer.analysis_height < 3 {
            return Err(ConfigError::Message(
                "Analysis resolution must be at least 3x3".to_string(),
            ));
        }

        if analyzer.interval_ms == 0 {
            return Err(ConfigError::Message(
                "Analyzer interval_ms must be greater than 0".to_string(),
            ));
        }

        if analyzer.texture_window == 0
            || analyzer.texture_window > analyzer.analysis_width.min(analyzer.analysis_height)
        {
            return Err(ConfigError::Message(
                "Texture window must fit inside the analysis resolution".to_string(),
            ));
        }

        if analyzer.texture_stride == 0
            || analyzer.repetition_sample_step == 0
            || analyzer.color_sample_step == 0
            || analyzer.motion_grid_step == 0
        {
            return Err(ConfigError::Message(
                "Sampling strides must be greater than 0".to_string(),
            ));
        }

        if analyzer.repetition_offsets.is_empty() {
            return Err(ConfigError::Message(
                "At least one repetition offset is required".to_string(),
            ));
        }

        if analyzer
            .repetition_offsets
            .iter()
            .any(|[dx, dy]| *dx >= analyzer.analysis_width || *dy >= analyzer.analysis_height)
        {
            return Err(ConfigError::Message(
                "Repetition offsets must be smaller than the analysis resolution".to_string(),
            ));
        }

        if !(2..=16).contains(&analyzer.color_levels) {
            return Err(ConfigError::Message(
                "color_levels must be between 2 and 16".to_string(),
            ));
        }

        if analyzer.sharpness_divisor <= 0.0 {
            return Err(ConfigError::Message(
                "sharpness_divisor must be positive".to_string(),
            ));
        }

        if analyzer.motion_history_len > MAX_MOTION_SAMPLES {
            return Err(ConfigError::Message(format!(
                "motion_history_len must be at most {}",
                MAX_MOTION_SAMPLES
            )));
        }

        if analyzer.min_stability_samples < MIN_STABILITY_SAMPLES
            || analyzer.min_stability_samples > analyzer.motion_history_len
        {
            return Err(ConfigError::Message(format!(
                "min_stability_samples must be between {} and motion_history_len",
                MIN_STABILITY_SAMPLES
            )));
        }

        if self.capture.poll_interval_ms == 0
            || self.capture.debounce_sample_ms == 0
            || self.capture.retry_delay_ms == 0
        {
            return Err(ConfigError::Message(
                "Capture timer intervals must be greater than 0".to_string(),
            ));
        }

        for (name, spec) in [
            ("local", &self.versions.local),
            ("analysis", &self.versions.analysis),
            ("archive", &self.versions.archive),
        ] {
            if spec.size == 0 {
                return Err(ConfigError::Message(format!(
                    "Version '{}' size must be greater than 0",
                    name
                )));
            }
            if !(spec.quality > 0.0 && spec.quality <= 1.0) {
                return Err(ConfigError::Message(format!(
                    "Version '{}' quality must be in (0, 1]",
                    name
                )));
            }
        }

        if self.versions.analysis.format != FormatPolicy::Universal {
            return Err(ConfigError::Message(
                "The analysis version must use the universal format".to_string(),
            ));
        }

        if self.storage.baseline_bytes_per_pixel <= 0.0 {
            return Err(ConfigError::Message(
                "baseline_bytes_per_pixel must be positive".to_string(),
            ));
        }

        if let ConfidenceProfile::Custom(thresholds) = &self.gates.confidence_profile {
            thresholds
                .validate()
                .map_err(|e| ConfigError::Message(e.to_string()))?;
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render this configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl AnalysisProfile {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl GateConfig {
    pub fn confidence_thresholds(&self) -> ConfidenceThresholds {
        self.confidence_profile.thresholds()
    }
}

impl CaptureConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn debounce_sample(&self) -> Duration {
        Duration::from_millis(self.debounce_sample_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            resolution: (1280, 720),
            fps: 30,
        }
    }
}

impl Default for AnalysisProfile {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            analysis_width: 160,
            analysis_height: 160,
            sharpness_divisor: 3.0,
            edge_magnitude_threshold: 100.0,
            texture_window: 9,
            texture_stride: 4,
            repetition_offsets: vec![[4, 0], [0, 4], [8, 0], [0, 8], [4, 4]],
            repetition_sample_step: 3,
            repetition_tolerance: 12,
            color_sample_step: 4,
            color_levels: 4,
            motion_grid_step: 4,
            motion_gain: 2.0,
            motion_history_len: 5,
            min_stability_samples: 3,
            stability_threshold: 8.0,
            reset_after_analyses: 500,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_tilt_degrees: 30.0,
            require_orientation: true,
            min_sharpness: 15.0,
            min_contrast: 20.0,
            min_edge_density: 5.0,
            min_texture: 10.0,
            max_motion: 15.0,
            confidence_profile: ConfidenceProfile::Standard,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            debounce_sample_ms: 100,
            retry_delay_ms: default_retry_delay_ms(),
            auto_retry: true,
            detection_enabled: true,
            auto_confirm: false,
        }
    }
}

impl Default for VersionsConfig {
    fn default() -> Self {
        Self {
            local: VersionSpec {
                size: 600,
                quality: 0.9,
                format: FormatPolicy::Preferred,
            },
            analysis: VersionSpec {
                size: 300,
                quality: 0.6,
                format: FormatPolicy::Universal,
            },
            archive: VersionSpec {
                size: 600,
                quality: 0.9,
                format: FormatPolicy::Preferred,
            },
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            quota_bytes: None,
            baseline_bytes_per_pixel: 0.35,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            archive_path: default_archive_path(),
            registry_path: "./carpetcam-data/venues.json".to_string(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_retry_delay_ms() -> u64 {
    3000
}
fn default_storage_path() -> String {
    "./carpetcam-data/assets".to_string()
}
fn default_archive_path() -> String {
    "./carpetcam-data/archive".to_string()
}
fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CarpetcamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gates.confidence_profile, ConfidenceProfile::Standard);
        assert_eq!(config.versions.local.size, config.versions.archive.size);
    }

    #[test]
    fn test_config_validation() {
        let mut config = CarpetcamConfig::default();
        config.analyzer.texture_window = 500;
        assert!(config.validate().is_err());

        config.analyzer.texture_window = 9;
        config.versions.analysis.format = FormatPolicy::Preferred;
        assert!(config.validate().is_err());

        config.versions.analysis.format = FormatPolicy::Universal;
        config.versions.local.quality = 1.5;
        assert!(config.validate().is_err());

        config.versions.local.quality = 0.9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_motion_history_bounds() {
        let mut config = CarpetcamConfig::default();
        config.analyzer.motion_history_len = 6;
        assert!(config.validate().is_err());

        config.analyzer.motion_history_len = 5;
        config.analyzer.min_stability_samples = 2;
        assert!(config.validate().is_err());

        config.analyzer.min_stability_samples = 4;
        config.analyzer.motion_history_len = 3;
        assert!(config.validate().is_err());

        config.analyzer.motion_history_len = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[capture]\ndebounce_ms = 750\nauto_confirm = true\n\n[gates]\nconfidence_profile = \"permissive\"\n"
        )
        .unwrap();

        let config = CarpetcamConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.capture.debounce_ms, 750);
        assert!(config.capture.auto_confirm);
        assert_eq!(config.capture.poll_interval_ms, 1000);
        assert_eq!(config.gates.confidence_profile, ConfidenceProfile::Permissive);
        assert_eq!(config.analyzer.texture_window, 9);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = CarpetcamConfig::load_from_file("/nonexistent/carpetcam.toml").unwrap();
        assert_eq!(config.capture.debounce_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_renders_as_toml() {
        let rendered = CarpetcamConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[analyzer]"));
        assert!(rendered.contains("debounce_ms = 500"));
    }
}
