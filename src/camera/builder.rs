use super::source::SharedFrameSource;
use super::still::StillImageSource;
use crate::config::CameraConfig;
use crate::error::{CarpetcamError, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Picks the frame source for the binary: a still image when one is given,
/// otherwise the V4L2 camera (only with the `camera` feature on Linux).
pub struct FrameSourceBuilder {
    config: Option<CameraConfig>,
    still_image: Option<PathBuf>,
}

impl FrameSourceBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            still_image: None,
        }
    }

    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn still_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.still_image = Some(path.into());
        self
    }

    pub fn build(self) -> Result<SharedFrameSource> {
        if let Some(path) = self.still_image {
            return Ok(Arc::new(StillImageSource::from_path(path)?));
        }

        let config = self
            .config
            .ok_or_else(|| CarpetcamError::system("Camera configuration must be specified"))?;
        Self::build_camera(config)
    }

    #[cfg(all(target_os = "linux", feature = "camera"))]
    fn build_camera(config: CameraConfig) -> Result<SharedFrameSource> {
        Ok(Arc::new(super::v4l2::V4l2FrameSource::new(config)?))
    }

    #[cfg(not(all(target_os = "linux", feature = "camera")))]
    fn build_camera(config: CameraConfig) -> Result<SharedFrameSource> {
        Err(CarpetcamError::component(
            "camera".to_string(),
            format!(
                "device {} requested but this build has no camera support; pass a still image instead",
                config.index
            ),
        ))
    }
}

impl Default for FrameSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
