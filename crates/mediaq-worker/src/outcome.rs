//! Processing outcomes and the acknowledgement policy.

use std::fmt;

/// What happened to one delivered message.
///
/// `Unprocessable` outcomes are terminal: the message is acknowledged so the
/// broker never redelivers it. `Failure` outcomes leave the message un-acked
/// for redelivery.
pub enum ProcessingOutcome {
    /// Entry processed successfully.
    Success,
    /// Entry can never be processed; human-readable reason.
    UnprocessableReason(String),
    /// Entry can never be processed; underlying error.
    UnprocessableError(anyhow::Error),
    /// Processing failed but may succeed on redelivery; reason.
    FailureReason(String),
    /// Processing failed but may succeed on redelivery; underlying error.
    FailureError(anyhow::Error),
}

impl ProcessingOutcome {
    /// Whether this outcome acknowledges the message.
    pub fn should_ack(&self) -> bool {
        !matches!(
            self,
            ProcessingOutcome::FailureReason(_) | ProcessingOutcome::FailureError(_)
        )
    }
}

impl fmt::Debug for ProcessingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingOutcome::Success => f.write_str("Success"),
            ProcessingOutcome::UnprocessableReason(r) => {
                f.debug_tuple("UnprocessableReason").field(r).finish()
            }
            ProcessingOutcome::UnprocessableError(e) => {
                f.debug_tuple("UnprocessableError").field(e).finish()
            }
            ProcessingOutcome::FailureReason(r) => f.debug_tuple("FailureReason").field(r).finish(),
            ProcessingOutcome::FailureError(e) => f.debug_tuple("FailureError").field(e).finish(),
        }
    }
}

/// Maps processor status codes onto outcomes.
///
/// Codes at or above `retry_threshold` are retryable failures; everything
/// below is success (the processor has already settled the entry, whether
/// with output or without). Unprocessable outcomes come from payload decoding,
/// not from status codes.
#[derive(Debug, Clone, Copy)]
pub struct AckPolicy {
    pub retry_threshold: i32,
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self {
            retry_threshold: 400,
        }
    }
}

impl AckPolicy {
    pub fn new(retry_threshold: i32) -> Self {
        Self { retry_threshold }
    }

    pub fn outcome(&self, status: i32) -> ProcessingOutcome {
        if status >= self.retry_threshold {
            ProcessingOutcome::FailureReason(format!(
                "processing finished with status {status}"
            ))
        } else {
            ProcessingOutcome::Success
        }
    }
}
