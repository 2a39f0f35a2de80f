//! Error types for Proctor Flux
//!
//! Each boundary of the session core has its own error enum. Detector ticks
//! never produce errors: an anomaly is a [`crate::types::Violation`], and a
//! failed frame read is logged and skipped.

use crate::types::SessionPhase;
use thiserror::Error;

/// Failure to acquire the combined camera + microphone stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("Camera/microphone permission denied")]
    PermissionDenied,

    #[error("No camera or microphone found")]
    NotFound,

    #[error("Camera is already in use by another application")]
    Busy,

    #[error("Media capture is not supported: {0}")]
    Unsupported(String),

    #[error("Failed to start capture: {0}")]
    Other(String),
}

impl DeviceError {
    /// Candidate-facing remedy for this failure
    pub fn remedy(&self) -> &'static str {
        match self {
            DeviceError::PermissionDenied => {
                "Camera/microphone permission denied. Please allow access and try again."
            }
            DeviceError::NotFound => {
                "No camera or microphone found. Please connect a camera and try again."
            }
            DeviceError::Busy => {
                "Camera is already in use by another application. Please close other apps and try again."
            }
            DeviceError::Unsupported(_) => {
                "This browser or device cannot provide camera access. Please switch to a supported device."
            }
            DeviceError::Other(_) => {
                "Camera and microphone access is required for this assessment."
            }
        }
    }
}

/// Failure delivering the final payload to the remote data store
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Submission rejected by data store: {0}")]
    Rejected(String),

    #[error("Submission endpoint not configured")]
    NotConfigured,

    #[error("Failed to encode payload: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failure in the durable local key-value store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by the session controller
#[derive(Debug, Error)]
pub enum ProctorError {
    #[error("Capture failed: {0}")]
    Device(#[from] DeviceError),

    #[error("Submission failed: {0}")]
    Submit(#[from] SubmitError),

    #[error("Please answer all questions. {unanswered} question(s) remaining.")]
    Validation { unanswered: usize },

    #[error("Operation requires phase {expected:?}, session is {actual:?}")]
    InvalidPhase {
        expected: SessionPhase,
        actual: SessionPhase,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
