use async_trait::async_trait;
use std::sync::Arc;

use crate::error::CameraError;
use crate::frame::FrameData;

/// Exclusive, acquirable source of raw frames.
///
/// A source is owned by one capture session at a time: the session calls
/// [`FrameSource::acquire`] when its camera step starts and
/// [`FrameSource::release`] when it stops. Frames are pulled, never pushed;
/// the analysis loop and the shutter both call [`FrameSource::grab_frame`].
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Open the device. Fails with `PermissionDenied` or `DeviceBusy` when
    /// another owner still holds it.
    async fn acquire(&self) -> Result<(), CameraError>;

    /// Close the device. Releasing an unacquired source is a no-op.
    async fn release(&self);

    /// Latest frame. `NotReady` while the device warms up or is not acquired,
    /// `Disconnected` when the device went away.
    async fn grab_frame(&self) -> Result<FrameData, CameraError>;

    /// Whether frames can currently be grabbed
    fn is_ready(&self) -> bool;
}

pub type SharedFrameSource = Arc<dyn FrameSource>;
