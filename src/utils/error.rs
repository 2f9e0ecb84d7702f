//! Error types and handling
//!
//! Common error types used across the recorder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Unsupported codec parameters, rejected at setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation invoked in the wrong lifecycle state
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Duplicate or out-of-protocol lifecycle notification
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Non-monotonic timestamp submitted for a track
    #[error("Ordering error: track {track} pts {pts_us}us is before {last_pts_us}us")]
    Ordering {
        track: usize,
        pts_us: i64,
        last_pts_us: i64,
    },

    /// Encoder failure mid-run
    #[error("Encoder fault: {0}")]
    EncoderFault(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error response for the control surface
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        let code = match &error {
            RecorderError::Configuration(_) => "CONFIGURATION_ERROR",
            RecorderError::Lifecycle(_) => "LIFECYCLE_ERROR",
            RecorderError::Protocol(_) => "PROTOCOL_ERROR",
            RecorderError::Ordering { .. } => "ORDERING_ERROR",
            RecorderError::EncoderFault(_) => "ENCODER_FAULT",
            RecorderError::AlreadyRecording => "ALREADY_RECORDING",
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Serialization(_) => "SERIALIZATION_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
