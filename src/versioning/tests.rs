use super::strategy::center_square;
use super::*;
use crate::config::{FormatPolicy, VersionSpec, VersionsConfig};
use crate::error::EncodeError;
use crate::frame::FrameData;
use image::{ImageFormat, Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

const WEBP_MAGIC: &[u8] = b"RIFF\x10\x00\x00\x00WEBPVP8L";

fn frame(image: RgbImage) -> FrameData {
    FrameData::from_rgb_image(1, SystemTime::now(), image)
}

/// Wide frame: blue side bands around a red centre square
fn banded_frame() -> FrameData {
    frame(RgbImage::from_fn(300, 100, |x, _| {
        if (100..200).contains(&x) {
            Rgb([220, 20, 20])
        } else {
            Rgb([20, 20, 220])
        }
    }))
}

/// Claims to encode AVIF/WebP but hands back JPEG
struct SubstitutingEncoder;

impl ImageEncoder for SubstitutingEncoder {
    fn encode(
        &self,
        image: &RgbImage,
        _format: EncodedFormat,
        quality: f32,
    ) -> Result<Vec<u8>, EncodeError> {
        ImageCrateEncoder.encode(image, EncodedFormat::Jpeg, quality)
    }
}

/// Passes the probe with WebP, then produces nothing at real sizes
struct EmptyWebpEncoder {
    webp_calls: AtomicUsize,
}

impl ImageEncoder for EmptyWebpEncoder {
    fn encode(
        &self,
        image: &RgbImage,
        format: EncodedFormat,
        quality: f32,
    ) -> Result<Vec<u8>, EncodeError> {
        match format {
            EncodedFormat::WebP => {
                self.webp_calls.fetch_add(1, Ordering::Relaxed);
                if image.width() <= 8 {
                    Ok(WEBP_MAGIC.to_vec())
                } else {
                    Ok(Vec::new())
                }
            }
            EncodedFormat::Avif => Err(EncodeError::Unsupported {
                format: format.to_string(),
            }),
            EncodedFormat::Jpeg => ImageCrateEncoder.encode(image, format, quality),
        }
    }
}

/// Fails everything, including JPEG
struct BrokenEncoder;

impl ImageEncoder for BrokenEncoder {
    fn encode(
        &self,
        _image: &RgbImage,
        format: EncodedFormat,
        _quality: f32,
    ) -> Result<Vec<u8>, EncodeError> {
        Err(EncodeError::Failed {
            format: format.to_string(),
            details: "codec crashed".to_string(),
        })
    }
}

#[tokio::test]
async fn test_three_versions_with_expected_dimensions() {
    let strategy = AssetVersioningStrategy::new(VersionsConfig::default());
    let set = strategy.derive(&banded_frame()).await.unwrap();

    assert_eq!(set.iter().count(), 3);
    assert_eq!((set.local.width, set.local.height), (600, 600));
    assert_eq!((set.archive.width, set.archive.height), (600, 600));
    assert_eq!((set.analysis.width, set.analysis.height), (300, 300));
    assert_eq!(set.local.format, set.archive.format);
    assert!(set.total_bytes() > 0);
}

#[tokio::test]
async fn test_analysis_variant_is_always_universal_format() {
    for encoder in [
        Arc::new(ImageCrateEncoder) as Arc<dyn ImageEncoder>,
        Arc::new(SubstitutingEncoder),
        Arc::new(EmptyWebpEncoder {
            webp_calls: AtomicUsize::new(0),
        }),
    ] {
        let strategy = AssetVersioningStrategy::with_encoder(VersionsConfig::default(), encoder);
        let set = strategy.derive(&banded_frame()).await.unwrap();

        assert_eq!(set.analysis.format, EncodedFormat::Jpeg);
        assert_eq!(set.analysis.mime_type(), "image/jpeg");
        assert_eq!(
            image::guess_format(&set.analysis.bytes).unwrap(),
            ImageFormat::Jpeg
        );
    }
}

#[tokio::test]
async fn test_center_crop_keeps_the_middle() {
    let strategy = AssetVersioningStrategy::new(VersionsConfig::default());
    let set = strategy.derive(&banded_frame()).await.unwrap();

    let decoded = image::load_from_memory(&set.analysis.bytes)
        .unwrap()
        .to_rgb8();
    for (x, y) in [(2, 2), (297, 2), (150, 150), (2, 297), (297, 297)] {
        let [r, _, b] = decoded.get_pixel(x, y).0;
        assert!(r > 150 && b < 100, "pixel ({}, {}) = {:?}", x, y, [r, b]);
    }
}

#[test]
fn test_center_square_geometry() {
    let tall = RgbImage::new(40, 100);
    assert_eq!(center_square(&tall).dimensions(), (40, 40));

    let square = RgbImage::new(7, 7);
    assert_eq!(center_square(&square).dimensions(), (7, 7));
}

#[tokio::test]
async fn test_probe_rejects_substituted_formats() {
    let strategy =
        AssetVersioningStrategy::with_encoder(VersionsConfig::default(), Arc::new(SubstitutingEncoder));

    assert_eq!(strategy.supported_formats().formats(), &[EncodedFormat::Jpeg]);

    let set = strategy.derive(&banded_frame()).await.unwrap();
    assert_eq!(set.local.format, EncodedFormat::Jpeg);
    assert!(!set.local.fell_back);
}

#[tokio::test]
async fn test_empty_output_falls_back_to_universal() {
    let encoder = Arc::new(EmptyWebpEncoder {
        webp_calls: AtomicUsize::new(0),
    });
    let strategy = AssetVersioningStrategy::with_encoder(VersionsConfig::default(), encoder.clone());

    assert_eq!(strategy.supported_formats().preferred(), EncodedFormat::WebP);

    let set = strategy.derive(&banded_frame()).await.unwrap();
    assert_eq!(set.local.format, EncodedFormat::Jpeg);
    assert!(set.local.fell_back);
    assert!(set.archive.fell_back);
    assert!(!set.analysis.fell_back);

    // one probe call plus local and archive
    assert_eq!(encoder.webp_calls.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn test_probe_runs_once_per_strategy() {
    let encoder = Arc::new(EmptyWebpEncoder {
        webp_calls: AtomicUsize::new(0),
    });
    let strategy = AssetVersioningStrategy::with_encoder(VersionsConfig::default(), encoder.clone());

    strategy.supported_formats();
    strategy.supported_formats();
    strategy.clone().supported_formats();
    assert_eq!(encoder.webp_calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_broken_encoder_still_yields_versions() {
    let strategy =
        AssetVersioningStrategy::with_encoder(VersionsConfig::default(), Arc::new(BrokenEncoder));
    let set = strategy.derive(&banded_frame()).await.unwrap();

    for (_, asset) in set.iter() {
        assert_eq!(asset.format, EncodedFormat::Jpeg);
        assert!(!asset.bytes.is_empty());
    }
}

#[tokio::test]
async fn test_universal_policy_for_local_variant() {
    let versions = VersionsConfig {
        local: VersionSpec {
            size: 64,
            quality: 0.5,
            format: FormatPolicy::Universal,
        },
        ..VersionsConfig::default()
    };
    let strategy = AssetVersioningStrategy::with_encoder(
        versions,
        Arc::new(EmptyWebpEncoder {
            webp_calls: AtomicUsize::new(0),
        }),
    );
    let set = strategy.derive(&banded_frame()).await.unwrap();

    assert_eq!(set.local.format, EncodedFormat::Jpeg);
    assert!(!set.local.fell_back);
    assert_eq!(set.local.width, 64);
}

#[tokio::test]
async fn test_unready_frame_is_rejected() {
    let strategy = AssetVersioningStrategy::new(VersionsConfig::default());
    let empty = FrameData::new(
        0,
        SystemTime::now(),
        Vec::new(),
        0,
        0,
        crate::frame::FrameFormat::Rgb24,
    );
    assert!(matches!(
        strategy.derive(&empty).await,
        Err(EncodeError::EmptySource)
    ));
}
