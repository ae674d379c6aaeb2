use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::{MessageType, Pipeline};
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, trace, warn};

use super::source::FrameSource;
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat};

/// No samples for this long means the device went away
const STALL_TIMEOUT: Duration = Duration::from_secs(5);

type LatestFrame = Arc<Mutex<Option<(FrameData, Instant)>>>;

/// V4L2 camera read through a GStreamer pipeline.
///
/// The device delivers MJPEG which is decoded to packed RGB inside the
/// pipeline; the appsink callback keeps only the newest frame.
pub struct V4l2FrameSource {
    config: CameraConfig,
    name: String,
    pipeline: Mutex<Option<Pipeline>>,
    latest: LatestFrame,
    frame_counter: Arc<AtomicU64>,
}

impl V4l2FrameSource {
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        info!(
            "Initializing GStreamer camera for device {} ({}x{} @ {}fps)",
            config.index, config.resolution.0, config.resolution.1, config.fps
        );

        gstreamer::init().map_err(|e| CameraError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        Ok(Self {
            name: format!("/dev/video{}", config.index),
            config,
            pipeline: Mutex::new(None),
            latest: Arc::new(Mutex::new(None)),
            frame_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    fn pipeline_description(&self) -> String {
        let (width, height) = self.config.resolution;
        format!(
            "v4l2src device={} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             queue max-size-buffers=4 leaky=downstream ! \
             jpegdec ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=sink sync=false max-buffers=1 drop=true enable-last-sample=false emit-signals=false",
            self.name, width, height, self.config.fps
        )
    }

    /// Surface permission problems before GStreamer turns them into bus errors
    fn check_device(&self) -> Result<(), CameraError> {
        match std::fs::OpenOptions::new().read(true).open(&self.name) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(CameraError::PermissionDenied)
            }
            Err(e) => Err(CameraError::Configuration {
                details: format!("{}: {}", self.name, e),
            }),
        }
    }

    fn build_pipeline(&self) -> Result<Pipeline, CameraError> {
        let description = self.pipeline_description();
        debug!("Creating GStreamer pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| CameraError::Configuration {
                details: "Pipeline has no appsink".to_string(),
            })?;

        let latest = Arc::clone(&self.latest);
        let frame_counter = Arc::clone(&self.frame_counter);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    match frame_from_sample(&sample, &frame_counter) {
                        Ok(frame) => *latest.lock() = Some((frame, Instant::now())),
                        Err(details) => warn!("Dropping camera sample: {}", details),
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        Ok(pipeline)
    }
}

/// Copy a packed RGB sample out of its (possibly row-padded) buffer
fn frame_from_sample(
    sample: &gstreamer::Sample,
    frame_counter: &AtomicU64,
) -> Result<FrameData, String> {
    let buffer = sample.buffer().ok_or("no buffer in sample")?;
    let caps = sample.caps().ok_or("no caps in sample")?;
    let info = VideoInfo::from_caps(caps).map_err(|e| format!("bad caps: {}", e))?;

    let width = info.width();
    let height = info.height();
    let stride = info.stride()[0] as usize;
    let row = width as usize * 3;

    let map = buffer
        .map_readable()
        .map_err(|e| format!("failed to map buffer: {}", e))?;
    let bytes = map.as_slice();
    if height == 0 || bytes.len() < stride * (height as usize - 1) + row {
        return Err(format!("short buffer ({} bytes)", bytes.len()));
    }

    let mut data = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        data.extend_from_slice(&bytes[y * stride..y * stride + row]);
    }

    let id = frame_counter.fetch_add(1, Ordering::Relaxed);
    trace!("Captured frame {} ({}x{})", id, width, height);
    Ok(FrameData::new(
        id,
        SystemTime::now(),
        data,
        width,
        height,
        FrameFormat::Rgb24,
    ))
}

#[async_trait]
impl FrameSource for V4l2FrameSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<(), CameraError> {
        if self.pipeline.lock().is_some() {
            return Err(CameraError::DeviceBusy {
                details: format!("{} is already streaming", self.name),
            });
        }

        self.check_device()?;
        let pipeline = self.build_pipeline()?;

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(CameraError::DeviceBusy {
                details: format!("Failed to start pipeline: {}", e),
            });
        }

        info!("GStreamer pipeline started for {}", self.name);
        *self.pipeline.lock() = Some(pipeline);
        Ok(())
    }

    async fn release(&self) {
        let pipeline = self.pipeline.lock().take();
        if let Some(pipeline) = pipeline {
            let _ = pipeline.set_state(gstreamer::State::Null);
            *self.latest.lock() = None;
            info!("GStreamer pipeline stopped for {}", self.name);
        }
    }

    async fn grab_frame(&self) -> Result<FrameData, CameraError> {
        let guard = self.pipeline.lock();
        let pipeline = guard.as_ref().ok_or(CameraError::NotReady)?;

        if let Some(bus) = pipeline.bus() {
            if let Some(message) = bus.pop_filtered(&[MessageType::Error]) {
                error!("Camera pipeline error on {}: {:?}", self.name, message);
                return Err(CameraError::Disconnected);
            }
        }

        match self.latest.lock().as_ref() {
            None => Err(CameraError::NotReady),
            Some((_, received)) if received.elapsed() >= STALL_TIMEOUT => {
                warn!(
                    "No camera frames received from {} for {:?}",
                    self.name, STALL_TIMEOUT
                );
                Err(CameraError::Disconnected)
            }
            Some((frame, _)) => Ok(frame.clone()),
        }
    }

    fn is_ready(&self) -> bool {
        self.pipeline.lock().is_some() && self.latest.lock().is_some()
    }
}
