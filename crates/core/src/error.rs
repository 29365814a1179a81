//! Error types for videogen core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for videogen core operations
pub type Result<T> = std::result::Result<T, Error>;

/// A single rejected request field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field name as it appears in the JSON body
    pub field: String,
    /// Human-readable reason
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Error types that can occur while serving a generation request
#[derive(Debug, Error)]
pub enum Error {
    /// Required settings are absent
    #[error("Missing required environment variables: {}", missing.join(", "))]
    Configuration {
        /// Names of the missing variables
        missing: Vec<String>,
    },

    /// Generation request failed range checks
    #[error("{} validation error(s) in generation request", .0.len())]
    Validation(Vec<FieldError>),

    /// Request input could not be used (e.g. seed image failed to load)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An accelerator is required but none is reachable
    #[error("Accelerator device '{device}' is not available")]
    DeviceUnavailable {
        /// Configured device identifier
        device: String,
    },

    /// The device ran out of memory during generation
    #[error("Device out of memory: {0}")]
    OutOfMemory(String),

    /// Pipeline weights could not be fetched or initialized
    #[error("Failed to load model '{model}': {message}")]
    ModelLoad {
        /// Model identifier
        model: String,
        /// Failure detail
        message: String,
    },

    /// Generation itself failed
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Generation was cancelled before producing output
    #[error("Generation cancelled")]
    Cancelled,

    /// Generation exceeded the configured deadline
    #[error("Generation exceeded deadline of {:?}", .0)]
    Timeout(Duration),

    /// Frames could not be written to a video file
    #[error("Video export failed: {0}")]
    Export(String),

    /// Remote object storage rejected the operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Local file is missing
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a model load error with context
    pub fn model_load(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModelLoad {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error from variable names
    pub fn configuration<I, S>(missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Configuration {
            missing: missing.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the device reported memory exhaustion
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory(_))
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
