//! Handoff errors
//!
//! Unlike the rest of Duet, coordination failures here are hard failures: a
//! sub-agent that starts without its transcript silently does the wrong
//! thing. Each cause maps to its own process exit status.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("handoff directory not found: {0}")]
    NotFound(PathBuf),

    #[error("handoff in {dir} did not stabilize within {waited_ms}ms")]
    Timeout { dir: PathBuf, waited_ms: u64 },

    #[error("invalid sub-agent type: {0:?}")]
    InvalidSubagent(String),

    #[error("inconsistent handoff: {0}")]
    Inconsistent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HandoffError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => 3,
            Self::Timeout { .. } => 4,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, HandoffError>;
