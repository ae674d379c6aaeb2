use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frame::FrameData;
use crate::storage::AssetKey;

/// Stage of a check-in session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStage {
    Initializing,
    CameraStarting,
    WaitingForGates,
    ConditionsMet,
    Capturing,
    PhotoReview,
    VerdictPending,
    Processing,
    Success,
    Failed,
}

impl CaptureStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureStage::Success | CaptureStage::Failed)
    }

    /// Whether the shutter may fire from this stage
    pub fn accepts_trigger(&self) -> bool {
        matches!(
            self,
            CaptureStage::WaitingForGates | CaptureStage::ConditionsMet
        )
    }
}

impl std::fmt::Display for CaptureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CaptureStage::Initializing => "initializing",
            CaptureStage::CameraStarting => "camera_starting",
            CaptureStage::WaitingForGates => "waiting_for_gates",
            CaptureStage::ConditionsMet => "conditions_met",
            CaptureStage::Capturing => "capturing",
            CaptureStage::PhotoReview => "photo_review",
            CaptureStage::VerdictPending => "verdict_pending",
            CaptureStage::Processing => "processing",
            CaptureStage::Success => "success",
            CaptureStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Frame held between the shutter and the user's decision
#[derive(Debug, Clone)]
pub struct CapturedPhoto {
    pub frame: FrameData,
    pub captured_at: DateTime<Utc>,
}

impl CapturedPhoto {
    pub fn new(frame: FrameData) -> Self {
        let captured_at = DateTime::<Utc>::from(frame.timestamp);
        Self { frame, captured_at }
    }

    pub fn captured_at_ms(&self) -> i64 {
        self.captured_at.timestamp_millis()
    }
}

/// The one live check-in of an orchestrator
#[derive(Debug, Clone)]
pub struct CaptureSession {
    /// Generation number; scheduled work compares against it before acting
    pub session_id: u64,
    pub pub_id: String,
    pub pub_name: String,
    pub stage: CaptureStage,
    /// Human-readable cause of the last failure
    pub error: Option<String>,
    pub photo: Option<CapturedPhoto>,
    /// Key of the local record once persisted
    pub saved_key: Option<AssetKey>,
    pub started_at: DateTime<Utc>,
    /// Camera attempts, including automatic and explicit retries
    pub attempts: u32,
}

impl CaptureSession {
    pub fn new(session_id: u64, pub_id: impl Into<String>, pub_name: impl Into<String>) -> Self {
        Self {
            session_id,
            pub_id: pub_id.into(),
            pub_name: pub_name.into(),
            stage: CaptureStage::Initializing,
            error: None,
            photo: None,
            saved_key: None,
            started_at: Utc::now(),
            attempts: 0,
        }
    }

    pub fn has_photo(&self) -> bool {
        self.photo.is_some()
    }
}
