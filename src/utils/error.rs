//! Error Handling Module
//!
//! Defines the error type for the CropCare inference core.
//! Uses thiserror for ergonomic error definitions.

use std::time::Duration;

use thiserror::Error;

/// Main error type for CropCare operations
#[derive(Error, Debug)]
pub enum CropCareError {
    /// Image bytes could not be decoded into a pixel grid
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Configuration or persisted label table is malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Classifier artifact is missing or corrupt
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Scoring failed on an otherwise valid input
    #[error("Inference error: {0}")]
    Inference(String),

    /// Request exceeded its latency budget
    #[error("Prediction timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CropCareError {
    /// Whether the caller can fix the failure by sending a different request
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::InvalidInput(_))
    }

    /// Whether the failure happens at boot and must stop the service
    pub fn is_startup_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::ModelUnavailable(_))
    }
}

/// Convenience Result type for CropCare operations
pub type Result<T> = std::result::Result<T, CropCareError>;
