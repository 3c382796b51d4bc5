//! Unified error types for Duet

use thiserror::Error;

/// Unified error type for all Duet operations
#[derive(Error, Debug)]
pub enum DuetError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Mode store errors
    #[error("Mode store error: {0}")]
    ModeStore(String),

    #[error("Invalid workflow mode: {0}")]
    InvalidMode(String),

    // Hook protocol errors
    #[error("Malformed hook input: {0}")]
    Protocol(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using DuetError
pub type Result<T> = std::result::Result<T, DuetError>;
