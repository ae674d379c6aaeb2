use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::error::EncodeError;

/// Output encodings, most compact first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodedFormat {
    Avif,
    WebP,
    Jpeg,
}

impl EncodedFormat {
    /// Candidates in the order the probe tries them
    pub const PRIORITY: [EncodedFormat; 3] =
        [EncodedFormat::Avif, EncodedFormat::WebP, EncodedFormat::Jpeg];

    /// Universally supported lossy format, assumed available everywhere
    pub const UNIVERSAL: EncodedFormat = EncodedFormat::Jpeg;

    pub fn mime_type(&self) -> &'static str {
        match self {
            EncodedFormat::Avif => "image/avif",
            EncodedFormat::WebP => "image/webp",
            EncodedFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            EncodedFormat::Avif => "avif",
            EncodedFormat::WebP => "webp",
            EncodedFormat::Jpeg => "jpg",
        }
    }

    pub fn image_format(&self) -> ImageFormat {
        match self {
            EncodedFormat::Avif => ImageFormat::Avif,
            EncodedFormat::WebP => ImageFormat::WebP,
            EncodedFormat::Jpeg => ImageFormat::Jpeg,
        }
    }

    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        Self::PRIORITY
            .into_iter()
            .find(|format| format.mime_type() == mime_type)
    }
}

impl fmt::Display for EncodedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Runtime image encoder.
///
/// Encoders are synchronous and CPU bound; callers run them on the blocking
/// pool. An encoder may return bytes of another format than the one asked
/// for, which is why formats are probed before use.
pub trait ImageEncoder: Send + Sync {
    /// `quality` is in (0, 1]; lossless encoders ignore it
    fn encode(
        &self,
        image: &RgbImage,
        format: EncodedFormat,
        quality: f32,
    ) -> Result<Vec<u8>, EncodeError>;
}

/// Encoder backed by the `image` crate's codecs
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateEncoder;

/// Map (0, 1] quality onto the JPEG 1-100 scale
pub(crate) fn jpeg_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

impl ImageEncoder for ImageCrateEncoder {
    fn encode(
        &self,
        image: &RgbImage,
        format: EncodedFormat,
        quality: f32,
    ) -> Result<Vec<u8>, EncodeError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EncodeError::EmptySource);
        }

        let mut output = Vec::new();
        let result = match format {
            EncodedFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut output, jpeg_quality(quality))
                    .encode_image(image)
            }
            // Quality is not adjustable for these codecs in the image crate
            EncodedFormat::Avif | EncodedFormat::WebP => DynamicImage::ImageRgb8(image.clone())
                .write_to(&mut Cursor::new(&mut output), format.image_format()),
        };

        result.map_err(|e| match e {
            image::ImageError::Unsupported(_) => EncodeError::Unsupported {
                format: format.to_string(),
            },
            other => EncodeError::Failed {
                format: format.to_string(),
                details: other.to_string(),
            },
        })?;

        Ok(output)
    }
}

/// Formats that produced correctly-typed output on this runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedFormatSet {
    formats: Vec<EncodedFormat>,
}

static PROCESS_FORMATS: OnceLock<SupportedFormatSet> = OnceLock::new();

impl SupportedFormatSet {
    /// Encode a tiny test image in every candidate format and keep the ones
    /// whose output really is that format. JPEG is always kept.
    pub fn probe(encoder: &dyn ImageEncoder) -> Self {
        let sample = RgbImage::from_fn(8, 8, |x, y| {
            image::Rgb([(x * 32) as u8, (y * 32) as u8, ((x + y) * 16) as u8])
        });

        let mut formats = Vec::new();
        for format in EncodedFormat::PRIORITY {
            if format == EncodedFormat::UNIVERSAL {
                formats.push(format);
                continue;
            }

            match encoder.encode(&sample, format, 0.8) {
                Ok(bytes) if bytes.is_empty() => {
                    debug!("Format probe: {} produced no output", format);
                }
                Ok(bytes) => match image::guess_format(&bytes) {
                    Ok(actual) if actual == format.image_format() => formats.push(format),
                    Ok(actual) => {
                        debug!("Format probe: {} was substituted with {:?}", format, actual)
                    }
                    Err(_) => debug!("Format probe: {} output is unrecognised", format),
                },
                Err(e) => debug!("Format probe: {} unavailable: {}", format, e),
            }
        }

        info!(
            "Supported asset formats: {}",
            formats
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self { formats }
    }

    /// Probe result for [`ImageCrateEncoder`], computed once per process
    pub fn process_default() -> &'static SupportedFormatSet {
        PROCESS_FORMATS.get_or_init(|| Self::probe(&ImageCrateEncoder))
    }

    pub fn supports(&self, format: EncodedFormat) -> bool {
        format == EncodedFormat::UNIVERSAL || self.formats.contains(&format)
    }

    /// Best supported format in priority order
    pub fn preferred(&self) -> EncodedFormat {
        self.formats
            .first()
            .copied()
            .unwrap_or(EncodedFormat::UNIVERSAL)
    }

    pub fn formats(&self) -> &[EncodedFormat] {
        &self.formats
    }
}
