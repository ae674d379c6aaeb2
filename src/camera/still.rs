use async_trait::async_trait;
use image::RgbImage;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

use super::source::FrameSource;
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat};

/// Serves one decoded image as if it were a live camera feed
pub struct StillImageSource {
    name: String,
    pixels: Arc<Vec<u8>>,
    width: u32,
    height: u32,
    acquired: AtomicBool,
    frame_counter: AtomicU64,
}

impl StillImageSource {
    pub fn new(name: impl Into<String>, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            name: name.into(),
            pixels: Arc::new(image.into_raw()),
            width,
            height,
            acquired: AtomicBool::new(false),
            frame_counter: AtomicU64::new(0),
        }
    }

    /// Decode an image file of any format the `image` crate reads
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| CameraError::Configuration {
            details: format!("cannot read {}: {}", path.display(), e),
        })?;

        let source = Self::new(path.display().to_string(), image.to_rgb8());
        info!(
            "Loaded still image source {} ({}x{})",
            source.name, source.width, source.height
        );
        Ok(source)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FrameSource for StillImageSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<(), CameraError> {
        if self.acquired.swap(true, Ordering::AcqRel) {
            return Err(CameraError::DeviceBusy {
                details: format!("{} is already acquired", self.name),
            });
        }
        debug!("Acquired still image source {}", self.name);
        Ok(())
    }

    async fn release(&self) {
        if self.acquired.swap(false, Ordering::AcqRel) {
            debug!("Released still image source {}", self.name);
        }
    }

    async fn grab_frame(&self) -> Result<FrameData, CameraError> {
        if !self.is_ready() {
            return Err(CameraError::NotReady);
        }

        let id = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        Ok(FrameData {
            id,
            timestamp: SystemTime::now(),
            data: Arc::clone(&self.pixels),
            width: self.width,
            height: self.height,
            format: FrameFormat::Rgb24,
        })
    }

    fn is_ready(&self) -> bool {
        self.acquired.load(Ordering::Acquire) && self.width > 0 && self.height > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grab_requires_acquire() {
        let source = StillImageSource::new("still", RgbImage::new(4, 3));
        assert!(matches!(source.grab_frame().await, Err(CameraError::NotReady)));

        source.acquire().await.unwrap();
        let frame = source.grab_frame().await.unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert!(frame.validate_size());

        let next = source.grab_frame().await.unwrap();
        assert_eq!(next.id, frame.id + 1);
        assert!(Arc::ptr_eq(&frame.data, &next.data));
    }

    #[tokio::test]
    async fn test_double_acquire_is_busy() {
        let source = StillImageSource::new("still", RgbImage::new(2, 2));
        source.acquire().await.unwrap();
        assert!(matches!(
            source.acquire().await,
            Err(CameraError::DeviceBusy { .. })
        ));

        source.release().await;
        assert!(!source.is_ready());
        source.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("floor.png");
        RgbImage::from_pixel(10, 8, image::Rgb([120, 40, 40]))
            .save(&path)
            .unwrap();

        let source = StillImageSource::from_path(&path).unwrap();
        assert_eq!(source.dimensions(), (10, 8));

        let missing = StillImageSource::from_path(dir.path().join("missing.png"));
        assert!(matches!(missing, Err(CameraError::Configuration { .. })));
    }
}
