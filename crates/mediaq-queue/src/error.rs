//! Queue error types.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur while talking to the broker.
#[derive(Debug, Error)]
pub enum QueueError {
    /// `publish` was called before `start`.
    #[error("Broker connection has not been started")]
    NotStarted,

    /// `start` has been called but the transport does not currently report a
    /// live link (e.g. the connect acknowledgment has not arrived yet).
    #[error("Broker client is not connected")]
    NotConnected,

    /// The broker accepted the request but answered with a non-success reason.
    #[error("Publish rejected by broker: {0}")]
    PublishRejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Pull failed: {0}")]
    PullFailed(String),

    #[error("Acknowledge failed: {0}")]
    AcknowledgeFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// More than one entry of a bulk enqueue still failed after all retry
    /// rounds; carries every residual cause.
    #[error("Bulk media entry enqueue failed ({} residual failures)", .0.len())]
    Aggregate(Vec<QueueError>),
}

impl QueueError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn pull_failed(msg: impl Into<String>) -> Self {
        Self::PullFailed(msg.into())
    }

    pub fn acknowledge_failed(msg: impl Into<String>) -> Self {
        Self::AcknowledgeFailed(msg.into())
    }

    /// Residual causes of an aggregate failure, if this is one.
    pub fn aggregate_causes(&self) -> Option<&[QueueError]> {
        match self {
            QueueError::Aggregate(causes) => Some(causes),
            _ => None,
        }
    }
}
