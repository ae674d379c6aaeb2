mod builder;
mod mock;
mod source;
mod still;
#[cfg(all(target_os = "linux", feature = "camera"))]
mod v4l2;

pub use builder::FrameSourceBuilder;
pub use mock::MockFrameSource;
pub use source::{FrameSource, SharedFrameSource};
pub use still::StillImageSource;
#[cfg(all(target_os = "linux", feature = "camera"))]
pub use v4l2::V4l2FrameSource;
