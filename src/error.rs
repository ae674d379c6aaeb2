use thiserror::Error;

#[derive(Error, Debug)]
pub enum CarpetcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl CarpetcamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether the pipeline can continue (possibly after a retry) after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            CarpetcamError::Config(_) => false,
            CarpetcamError::Analyzer(_) => true,
            CarpetcamError::Camera(e) => e.is_transient(),
            CarpetcamError::Capture(_) => true,
            CarpetcamError::Encode(_) => true,
            CarpetcamError::Store(_) => false,
            CarpetcamError::Sync(_) => true,
            CarpetcamError::Detection(_) => true,
            CarpetcamError::EventBus(_) => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum AnalyzerError {
    #[error("Frame source not ready: {details}")]
    NotReady { details: String },

    #[error("Frame processing failed: {details}")]
    FrameProcessing { details: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Camera device busy: {details}")]
    DeviceBusy { details: String },

    #[error("Camera not ready")]
    NotReady,

    #[error("Camera disconnected")]
    Disconnected,

    #[error("Camera configuration error: {details}")]
    Configuration { details: String },
}

impl CameraError {
    /// Readiness hiccups clear up on their own; everything else needs a retry
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::NotReady)
    }

    /// Human-readable cause shown next to the retry action
    pub fn user_message(&self) -> String {
        match self {
            CameraError::PermissionDenied => {
                "Camera access was denied. Allow camera access and try again.".to_string()
            }
            CameraError::DeviceBusy { .. } => {
                "The camera is in use by another application.".to_string()
            }
            CameraError::NotReady => "The camera is still starting up.".to_string(),
            CameraError::Disconnected => "The camera stopped responding.".to_string(),
            CameraError::Configuration { details } => {
                format!("The camera could not be configured: {}", details)
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("No active check-in session")]
    SessionNotActive,

    #[error("Operation '{operation}' not allowed in stage {stage}")]
    InvalidTransition { operation: String, stage: String },

    #[error("A capture is already in progress")]
    AlreadyCapturing,
}

#[derive(Error, Debug, Clone)]
pub enum EncodeError {
    #[error("Format {format} is not supported by this encoder")]
    Unsupported { format: String },

    #[error("Encoding to {format} failed: {details}")]
    Failed { format: String, details: String },

    #[error("Encoder produced no output for {format}")]
    EmptyOutput { format: String },

    #[error("Source image is empty")]
    EmptySource,
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Asset store is not initialized")]
    NotInitialized,

    #[error("No user is signed in")]
    NoCurrentUser,

    #[error("Key already exists: {key}")]
    KeyExists { key: String },

    #[error("Invalid asset key: {details}")]
    InvalidKey { details: String },

    #[error("Write failed for {key}: {details}")]
    WriteFailed { key: String, details: String },

    #[error("Read failed: {details}")]
    ReadFailed { details: String },
}

#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("Upload to {path} failed: {details}")]
    UploadFailed { path: String, details: String },

    #[error("Venue registry error: {details}")]
    Registry { details: String },
}

#[derive(Error, Debug, Clone)]
pub enum DetectionError {
    #[error("Detector unavailable: {details}")]
    Unavailable { details: String },

    #[error("Detector rejected the image: {details}")]
    InvalidImage { details: String },
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, CarpetcamError>;
