use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One of the most frequent quantized colours in a frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DominantColor {
    /// Centre of the quantization bin
    pub rgb: [u8; 3],
    /// Share of sampled pixels in this bin (0-100)
    pub share: f64,
}

/// Quality and pattern snapshot for the most recent frame.
///
/// Replaced wholesale on every analysis; nothing is merged across frames
/// except `motion_level`, which feeds the [`MotionHistory`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetrics {
    /// Mean luma, 0-255
    pub brightness: f64,
    /// Luma range as a percentage, 0-100
    pub contrast: f64,
    /// Scaled mean Sobel magnitude, 0-100
    pub sharpness: f64,
    /// Mean per-channel variance of the colour sample (unbounded)
    pub color_variance: f64,
    /// Mean HSV saturation, 0-100
    pub saturation: f64,
    /// Share of interior pixels on a strong edge, 0-100
    pub edge_density: f64,
    /// Mean local brightness deviation, 0-100
    pub texture_complexity: f64,
    /// Structured repetition score, 0-100
    pub repetition: f64,
    /// Up to three dominant colours, most frequent first
    pub dominant_colors: Vec<DominantColor>,
    /// Frame-to-frame change, 0-100
    pub motion_level: f64,
    pub is_stable: bool,
    pub analysis_duration_ms: u64,
    /// Source frame dimensions (not the analysis resolution)
    pub frame_dimensions: (u32, u32),
    pub captured_at_ms: i64,
}

/// Bounded FIFO of recent motion levels
#[derive(Debug, Clone)]
pub struct MotionHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

/// Upper bound on retained motion samples
pub const MAX_MOTION_SAMPLES: usize = 5;

/// Stability is never reported from fewer samples than this
pub const MIN_STABILITY_SAMPLES: usize = 3;

impl MotionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_MOTION_SAMPLES);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a sample, evicting the oldest one when full
    pub fn push(&mut self, motion_level: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(motion_level);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn rolling_average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Stable once enough samples exist and their average sits below the threshold
    pub fn is_stable(&self, threshold: f64, min_samples: usize) -> bool {
        if self.samples.len() < min_samples {
            return false;
        }
        self.rolling_average()
            .map(|avg| avg < threshold)
            .unwrap_or(false)
    }
}
