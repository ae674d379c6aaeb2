mod frame_analyzer;
mod metrics;
mod runner;
#[cfg(test)]
pub(crate) mod test_frames;

pub use frame_analyzer::FrameAnalyzer;
pub use metrics::{
    DominantColor, FrameMetrics, MotionHistory, MAX_MOTION_SAMPLES, MIN_STABILITY_SAMPLES,
};
pub use runner::{AnalysisLoopStats, FrameAnalysisLoop, TickOutcome};
