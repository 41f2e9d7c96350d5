//! Error types for Trailguard.

use thiserror::Error;

/// Main error type for Trailguard operations.
#[derive(Error, Debug)]
pub enum TrailguardError {
    /// Window duration or request budget was zero, negative or not a number
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration file could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller-supplied key extractor failed
    #[error("Key extraction failed: {0}")]
    KeyExtraction(String),

    /// A replay trace line could not be parsed
    #[error("Trace error on line {line}: {reason}")]
    Trace { line: usize, reason: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TrailguardError {
    fn from(err: config::ConfigError) -> Self {
        TrailguardError::Config(err.to_string())
    }
}

/// Result type alias for Trailguard operations.
pub type Result<T> = std::result::Result<T, TrailguardError>;
