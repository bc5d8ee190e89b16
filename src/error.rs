//! Error types for the Throttled service.

use thiserror::Error;

/// Main error type for Throttled operations.
///
/// A denied admission is not an error; see [`crate::ratelimit::Outcome::Denied`].
#[derive(Error, Debug)]
pub enum ThrottledError {
    /// Missing or unparseable key, rate, burst or timeout
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The store could not allocate room for a new limiter
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ThrottledError {
    fn from(err: config::ConfigError) -> Self {
        ThrottledError::Config(err.to_string())
    }
}

/// Result type alias for Throttled operations.
pub type Result<T> = std::result::Result<T, ThrottledError>;
