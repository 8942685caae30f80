//! Error types for the DDSP trainer.

use thiserror::Error;

/// Result type alias for trainer operations.
pub type Result<T> = std::result::Result<T, DdspError>;

/// Main error type for trainer operations.
#[derive(Error, Debug)]
pub enum DdspError {
    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model type outside the recognized set.
    #[error(" [x] Unknown Model: {0}")]
    UnknownModel(String),

    /// The training loss became NaN; the optimization trajectory is corrupt.
    #[error(" [x] nan loss at step {step}")]
    NanLoss {
        /// Global step at which the loss was NaN.
        step: usize,
    },

    /// Tensor shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// A loss breakdown did not contain a required metric.
    #[error("Missing metric in loss breakdown: {0}")]
    MissingMetric(String),

    /// Checkpoint persistence errors.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Audio encoding errors.
    #[error("Audio error: {0}")]
    Audio(String),

    /// Errors raised by the tensor backend, model or loss implementation.
    #[error("Backend error: {0}")]
    Backend(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_yaml::Error> for DdspError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
