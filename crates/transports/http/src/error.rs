//! HTTP transport error types

use thiserror::Error;

/// HTTP transport error types
#[derive(Debug, Error)]
pub enum Error {
    /// Bind address could not be parsed
    #[error("Invalid bind address '{address}': {message}")]
    InvalidBindAddress { address: String, message: String },

    /// Listener could not be opened
    #[error("Failed to bind {0}: {1}")]
    Bind(String, #[source] std::io::Error),

    /// Server error
    #[error("Server error: {0}")]
    ServerError(String),
}

/// Result type for HTTP transport operations
pub type Result<T> = std::result::Result<T, Error>;
