//! Error types for the entropy bottleneck

use thiserror::Error;

/// Result type for codec operations
pub type DcnResult<T> = Result<T, DcnError>;

/// Errors raised eagerly at construction or call time.
///
/// Numeric degeneracy (underflowing kernel weights, collapsed histograms) is
/// never reported here; it is absorbed by the epsilon floors.
#[derive(Error, Debug)]
pub enum DcnError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DcnError {
    pub fn config(message: impl Into<String>) -> Self {
        DcnError::Configuration(message.into())
    }

    pub fn shape(message: impl Into<String>) -> Self {
        DcnError::ShapeMismatch(message.into())
    }
}
