mod builder;
mod orchestrator;
mod session;


pub use builder::CaptureOrchestratorBuilder;
pub use orchestrator::CaptureOrchestrator;
pub use session::{CaptureSession, CaptureStage, CapturedPhoto};
