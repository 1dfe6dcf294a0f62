//! Processor error types.

use thiserror::Error;

/// Result type for processor operations.
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Errors surfaced by the resizer services or the processing boundary.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The media itself is broken; resubmitting the same entry cannot help.
    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    /// The resizer does not support this media format.
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The resizer does not support the requested resize mode.
    #[error("Unsupported resize mode: {0}")]
    UnsupportedResizeMode(String),

    /// The resizer rejected the job for an operational reason.
    #[error("Resizer rejected the job: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProcessorError {
    pub fn invalid_media(msg: impl Into<String>) -> Self {
        Self::InvalidMedia(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// True when resubmitting the same entry can never succeed, so the
    /// message must not be redelivered.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessorError::InvalidMedia(_)
                | ProcessorError::UnsupportedMediaType(_)
                | ProcessorError::UnsupportedResizeMode(_)
        )
    }
}
