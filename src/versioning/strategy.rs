use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use super::encoder::{EncodedFormat, ImageCrateEncoder, ImageEncoder, SupportedFormatSet};
use crate::config::{FormatPolicy, VersionSpec, VersionsConfig};
use crate::error::{AnalyzerError, EncodeError};
use crate::frame::FrameData;

/// Purpose of one derived variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    /// UI background
    Local,
    /// Small payload for the remote detector
    Analysis,
    /// Durable dataset copy
    Archive,
}

impl fmt::Display for VersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VersionKind::Local => "local",
            VersionKind::Analysis => "analysis",
            VersionKind::Archive => "archive",
        };
        f.write_str(name)
    }
}

/// One encoded derivative of a captured frame
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAsset {
    pub bytes: Bytes,
    pub format: EncodedFormat,
    pub width: u32,
    pub height: u32,
    /// The requested format failed and the universal format was used instead
    pub fell_back: bool,
}

impl EncodedAsset {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// The three variants derived from one frame; immutable once produced
#[derive(Debug, Clone, PartialEq)]
pub struct AssetVersionSet {
    pub local: EncodedAsset,
    pub analysis: EncodedAsset,
    pub archive: EncodedAsset,
}

impl AssetVersionSet {
    pub fn get(&self, kind: VersionKind) -> &EncodedAsset {
        match kind {
            VersionKind::Local => &self.local,
            VersionKind::Analysis => &self.analysis,
            VersionKind::Archive => &self.archive,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (VersionKind, &EncodedAsset)> {
        [VersionKind::Local, VersionKind::Analysis, VersionKind::Archive]
            .into_iter()
            .map(move |kind| (kind, self.get(kind)))
    }

    pub fn total_bytes(&self) -> u64 {
        self.iter().map(|(_, asset)| asset.byte_size()).sum()
    }
}

enum FormatCache {
    /// Shared probe result for the built-in encoder
    Process,
    /// Probe result for an injected encoder
    Probed(OnceLock<SupportedFormatSet>),
}

struct StrategyInner {
    versions: VersionsConfig,
    encoder: Arc<dyn ImageEncoder>,
    formats: FormatCache,
}

/// Turns one captured frame into the local, analysis and archive variants.
///
/// Each variant is a centred square crop resized to the variant's edge and
/// encoded in the variant's format. Encoding never fails the derivation:
/// an error or empty output falls back to the universal format.
#[derive(Clone)]
pub struct AssetVersioningStrategy {
    inner: Arc<StrategyInner>,
}

impl AssetVersioningStrategy {
    pub fn new(versions: VersionsConfig) -> Self {
        Self {
            inner: Arc::new(StrategyInner {
                versions,
                encoder: Arc::new(ImageCrateEncoder),
                formats: FormatCache::Process,
            }),
        }
    }

    pub fn with_encoder(versions: VersionsConfig, encoder: Arc<dyn ImageEncoder>) -> Self {
        Self {
            inner: Arc::new(StrategyInner {
                versions,
                encoder,
                formats: FormatCache::Probed(OnceLock::new()),
            }),
        }
    }

    pub fn versions(&self) -> &VersionsConfig {
        &self.inner.versions
    }

    /// Capability probe result, computed on first use
    pub fn supported_formats(&self) -> &SupportedFormatSet {
        self.inner.supported_formats()
    }

    /// Derive the three variants on the blocking pool.
    ///
    /// Fails only when the frame itself cannot be decoded.
    pub async fn derive(&self, frame: &FrameData) -> Result<AssetVersionSet, EncodeError> {
        let inner = Arc::clone(&self.inner);
        let frame = frame.clone();

        tokio::task::spawn_blocking(move || {
            let image = frame.to_rgb_image().map_err(|e| match e {
                AnalyzerError::NotReady { .. } => EncodeError::EmptySource,
                AnalyzerError::FrameProcessing { details } => EncodeError::Failed {
                    format: "source".to_string(),
                    details,
                },
            })?;
            inner.derive_image(&image)
        })
        .await
        .map_err(|e| EncodeError::Failed {
            format: "all".to_string(),
            details: format!("versioning task failed: {}", e),
        })?
    }
}

impl StrategyInner {
    fn supported_formats(&self) -> &SupportedFormatSet {
        match &self.formats {
            FormatCache::Process => SupportedFormatSet::process_default(),
            FormatCache::Probed(cell) => {
                cell.get_or_init(|| SupportedFormatSet::probe(self.encoder.as_ref()))
            }
        }
    }

    fn derive_image(&self, image: &RgbImage) -> Result<AssetVersionSet, EncodeError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EncodeError::EmptySource);
        }

        let square = center_square(image);
        let versions = &self.versions;

        Ok(AssetVersionSet {
            local: self.render(&square, VersionKind::Local, &versions.local)?,
            analysis: self.render(&square, VersionKind::Analysis, &versions.analysis)?,
            archive: self.render(&square, VersionKind::Archive, &versions.archive)?,
        })
    }

    fn render(
        &self,
        square: &RgbImage,
        kind: VersionKind,
        spec: &VersionSpec,
    ) -> Result<EncodedAsset, EncodeError> {
        let size = spec.size.max(1);
        let resized = imageops::resize(square, size, size, FilterType::Triangle);

        let requested = match spec.format {
            FormatPolicy::Preferred => self.supported_formats().preferred(),
            FormatPolicy::Universal => EncodedFormat::UNIVERSAL,
        };

        let (bytes, format, fell_back) = match self.encoder.encode(&resized, requested, spec.quality)
        {
            Ok(bytes) if !bytes.is_empty() => (bytes, requested, false),
            outcome => {
                let reason = match outcome {
                    Err(e) => e.to_string(),
                    Ok(_) => EncodeError::EmptyOutput {
                        format: requested.to_string(),
                    }
                    .to_string(),
                };
                warn!(
                    "Encoding {} variant as {} failed ({}), using {}",
                    kind,
                    requested,
                    reason,
                    EncodedFormat::UNIVERSAL
                );
                (self.encode_universal(&resized, spec.quality)?, EncodedFormat::UNIVERSAL, true)
            }
        };

        debug!(
            "Derived {} variant: {}x{} {} ({} bytes)",
            kind,
            size,
            size,
            format,
            bytes.len()
        );

        Ok(EncodedAsset {
            bytes: Bytes::from(bytes),
            format,
            width: size,
            height: size,
            fell_back,
        })
    }

    /// The injected encoder first, then the built-in JPEG codec
    fn encode_universal(&self, image: &RgbImage, quality: f32) -> Result<Vec<u8>, EncodeError> {
        match self.encoder.encode(image, EncodedFormat::UNIVERSAL, quality) {
            Ok(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => {
                let bytes = ImageCrateEncoder.encode(image, EncodedFormat::UNIVERSAL, quality)?;
                if bytes.is_empty() {
                    return Err(EncodeError::EmptyOutput {
                        format: EncodedFormat::UNIVERSAL.to_string(),
                    });
                }
                Ok(bytes)
            }
        }
    }
}

/// Centred square crop with side min(width, height)
pub(crate) fn center_square(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    imageops::crop_imm(image, x, y, side, side).to_image()
}
