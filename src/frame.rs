use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::AnalyzerError;

/// Pixel layout of a raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Compressed JPEG frame
    Jpeg,
    /// Packed 8-bit RGB
    Rgb24,
    /// Packed 8-bit RGBA
    Rgba32,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Jpeg => 0, // Variable size, compressed
            FrameFormat::Rgb24 => 3,
            FrameFormat::Rgba32 => 4,
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Jpeg)
    }
}

/// Frame data structure containing raw frame data and metadata
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Unique frame identifier
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame format
    pub format: FrameFormat,
}

impl FrameData {
    /// Create a new frame data instance
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Wrap a decoded RGB image as a raw frame
    pub fn from_rgb_image(id: u64, timestamp: SystemTime, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(id, timestamp, image.into_raw(), width, height, FrameFormat::Rgb24)
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => !self.data.is_empty(),
        }
    }

    /// A frame is usable once it has non-zero dimensions and a payload of the right size
    pub fn ensure_ready(&self) -> Result<(), AnalyzerError> {
        if self.width == 0 || self.height == 0 {
            return Err(AnalyzerError::NotReady {
                details: format!("frame {} has zero dimensions", self.id),
            });
        }
        if !self.validate_size() {
            return Err(AnalyzerError::NotReady {
                details: format!(
                    "frame {} payload is {} bytes, expected {:?}",
                    self.id,
                    self.data.len(),
                    self.expected_size()
                ),
            });
        }
        Ok(())
    }

    /// Capture time in milliseconds since the Unix epoch
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Decode (JPEG) or repack (raw formats) into an owned RGB image
    pub fn to_rgb_image(&self) -> Result<RgbImage, AnalyzerError> {
        self.ensure_ready()?;

        match self.format {
            FrameFormat::Jpeg => {
                let decoded = image::load_from_memory(&self.data).map_err(|e| {
                    AnalyzerError::FrameProcessing {
                        details: format!("JPEG decode failed: {}", e),
                    }
                })?;
                Ok(decoded.to_rgb8())
            }
            FrameFormat::Rgb24 => RgbImage::from_raw(self.width, self.height, self.data.to_vec())
                .ok_or_else(|| AnalyzerError::FrameProcessing {
                    details: "Failed to create RGB image from raw data".to_string(),
                }),
            FrameFormat::Rgba32 => {
                let rgba =
                    image::RgbaImage::from_raw(self.width, self.height, self.data.to_vec())
                        .ok_or_else(|| AnalyzerError::FrameProcessing {
                            details: "Failed to create RGBA image from raw data".to_string(),
                        })?;
                Ok(DynamicImage::ImageRgba8(rgba).to_rgb8())
            }
        }
    }
}
