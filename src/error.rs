// Error types for the Mood Mirror application

use thiserror::Error;

/// Main error type for the Mood Mirror application
#[derive(Debug, Error)]
pub enum MoodMirrorError {
    #[error("Camera initialization failed: {0}")]
    CameraInit(String),

    #[error("Frame processing failed: {0}")]
    FrameProcessing(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Face detection failed: {0}")]
    FaceDetection(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(String),

    #[error("OpenCV error: {0}")]
    OpenCV(String),

    #[error("Async runtime unavailable: {0}")]
    Runtime(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Mood Mirror operations
pub type Result<T> = std::result::Result<T, MoodMirrorError>;

// Conversion from nokhwa errors
impl From<nokhwa::NokhwaError> for MoodMirrorError {
    fn from(err: nokhwa::NokhwaError) -> Self {
        match err {
            nokhwa::NokhwaError::StructureError { structure, error } => {
                MoodMirrorError::CameraInit(format!("{structure}: {error}"))
            }
            nokhwa::NokhwaError::OpenDeviceError(device, error) => {
                MoodMirrorError::CameraInit(format!("Device {device}: {error}"))
            }
            nokhwa::NokhwaError::ReadFrameError(error) => MoodMirrorError::FrameProcessing(error),
            _ => MoodMirrorError::CameraInit(err.to_string()),
        }
    }
}

// Conversion from OpenCV errors
impl From<opencv::Error> for MoodMirrorError {
    fn from(err: opencv::Error) -> Self {
        MoodMirrorError::OpenCV(err.to_string())
    }
}

// Conversion from ONNX Runtime errors
impl From<ort::Error> for MoodMirrorError {
    fn from(err: ort::Error) -> Self {
        MoodMirrorError::OnnxRuntime(err.to_string())
    }
}

// Conversion from TOML parse errors
impl From<toml::de::Error> for MoodMirrorError {
    fn from(err: toml::de::Error) -> Self {
        MoodMirrorError::Config(err.to_string())
    }
}
