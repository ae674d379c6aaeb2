use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::debug;

use super::source::FrameSource;
use crate::error::CameraError;
use crate::frame::FrameData;

/// Scripted frame source for tests and demos without real hardware.
///
/// Queued frames are served in order; once the queue runs dry the last frame
/// is repeated with a fresh id and timestamp. Failures queued with
/// [`MockFrameSource::fail_next_acquire`] and [`MockFrameSource::fail_next_grab`]
/// are returned before any frame.
pub struct MockFrameSource {
    frames: Mutex<VecDeque<FrameData>>,
    last_frame: Mutex<Option<FrameData>>,
    acquire_failures: Mutex<VecDeque<CameraError>>,
    grab_failures: Mutex<VecDeque<CameraError>>,
    acquired: AtomicBool,
    frame_counter: AtomicU64,
    acquire_count: AtomicU64,
    release_count: AtomicU64,
    grab_count: AtomicU64,
}

impl MockFrameSource {
    /// Source that repeats one frame forever
    pub fn new(frame: FrameData) -> Self {
        Self::with_frames(vec![frame])
    }

    pub fn with_frames(frames: Vec<FrameData>) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
            last_frame: Mutex::new(None),
            acquire_failures: Mutex::new(VecDeque::new()),
            grab_failures: Mutex::new(VecDeque::new()),
            acquired: AtomicBool::new(false),
            frame_counter: AtomicU64::new(0),
            acquire_count: AtomicU64::new(0),
            release_count: AtomicU64::new(0),
            grab_count: AtomicU64::new(0),
        }
    }

    pub fn push_frame(&self, frame: FrameData) {
        self.frames.lock().push_back(frame);
    }

    pub fn fail_next_acquire(&self, error: CameraError) {
        self.acquire_failures.lock().push_back(error);
    }

    pub fn fail_next_grab(&self, error: CameraError) {
        self.grab_failures.lock().push_back(error);
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }

    pub fn acquire_count(&self) -> u64 {
        self.acquire_count.load(Ordering::Relaxed)
    }

    pub fn release_count(&self) -> u64 {
        self.release_count.load(Ordering::Relaxed)
    }

    /// Successful and failed grabs
    pub fn grab_count(&self) -> u64 {
        self.grab_count.load(Ordering::Relaxed)
    }

    fn next_frame(&self) -> Option<FrameData> {
        let mut last = self.last_frame.lock();
        let base = match self.frames.lock().pop_front() {
            Some(frame) => frame,
            None => last.clone()?,
        };
        *last = Some(base.clone());

        let mut frame = base;
        frame.id = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        frame.timestamp = SystemTime::now();
        Some(frame)
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn acquire(&self) -> Result<(), CameraError> {
        self.acquire_count.fetch_add(1, Ordering::Relaxed);

        if let Some(error) = self.acquire_failures.lock().pop_front() {
            debug!("Mock source acquire failing with: {}", error);
            return Err(error);
        }

        if self.acquired.swap(true, Ordering::AcqRel) {
            return Err(CameraError::DeviceBusy {
                details: "mock source already acquired".to_string(),
            });
        }
        Ok(())
    }

    async fn release(&self) {
        if self.acquired.swap(false, Ordering::AcqRel) {
            self.release_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn grab_frame(&self) -> Result<FrameData, CameraError> {
        self.grab_count.fetch_add(1, Ordering::Relaxed);

        if let Some(error) = self.grab_failures.lock().pop_front() {
            debug!("Mock source grab failing with: {}", error);
            return Err(error);
        }

        if !self.is_acquired() {
            return Err(CameraError::NotReady);
        }

        self.next_frame().ok_or(CameraError::NotReady)
    }

    fn is_ready(&self) -> bool {
        self.is_acquired()
    }
}
