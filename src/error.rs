//! Classified failures of the transfer pipeline.
//!
//! Every stage returns one of these instead of panicking, and the
//! orchestrator hands the first one back unchanged so callers can tell
//! the root cause apart.

use std::time::Duration;

use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Input bytes could not be decoded as an image.
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// No usable face was found during preprocessing.
    #[error("no face detected in the image")]
    NoFaceDetected,

    /// Region name outside the fixed selector set.
    #[error("unknown region selector '{0}' (expected one of: lips, eyeshadow, skin, all)")]
    InvalidRegionSelector(String),

    /// Intensity is NaN or infinite.
    #[error("invalid intensity {0}: must be a finite number")]
    InvalidIntensity(f32),

    /// Two inputs that must share a size do not.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    /// The generator (or one of its inputs) failed.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// Caller-imposed deadline exceeded.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Detector or parser model failure.
    #[error("model error: {0}")]
    Model(String),
}

impl Error {
    /// Stable machine-readable code used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Decode(_) => "DECODE_ERROR",
            Error::NoFaceDetected => "NO_FACE_DETECTED",
            Error::InvalidRegionSelector(_) => "INVALID_REGION_SELECTOR",
            Error::InvalidIntensity(_) => "INVALID_INTENSITY",
            Error::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Error::TransferFailed(_) => "TRANSFER_FAILED",
            Error::Timeout(_) => "TIMEOUT",
            Error::Model(_) => "MODEL_ERROR",
        }
    }

    /// True for failures caused by the request itself rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Decode(_)
                | Error::NoFaceDetected
                | Error::InvalidRegionSelector(_)
                | Error::InvalidIntensity(_)
                | Error::DimensionMismatch { .. }
        )
    }

    pub(crate) fn dimensions(expected: (u32, u32), actual: (u32, u32)) -> Self {
        Error::DimensionMismatch {
            expected: format!("{}x{}", expected.0, expected.1),
            actual: format!("{}x{}", actual.0, actual.1),
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
