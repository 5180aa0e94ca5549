//! Error types for Keygate.

use thiserror::Error;

/// Main error type for Keygate operations.
///
/// Admission decisions are never errors; only construction and
/// configuration loading can fail.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// A limiter was constructed with parameters it cannot honor
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Keygate operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
