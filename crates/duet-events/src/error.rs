//! Error types for the event sinks

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("turso error: {0}")]
    Turso(#[from] turso::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("core error: {0}")]
    Core(#[from] duet_core::DuetError),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
