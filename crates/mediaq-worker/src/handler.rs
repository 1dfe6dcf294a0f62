//! Shared message handling: payload decoding plus the processing boundary,
//! mapped onto a [`ProcessingOutcome`] via the acknowledgement policy.

use std::sync::Arc;

use mediaq_models::MediaEntry;
use mediaq_processor::EntryProcessor;

use crate::outcome::{AckPolicy, ProcessingOutcome};

/// Decodes payloads and runs them through the processor. Used by both the
/// pull consumer pool and the MQTT push consumer.
pub struct MessageHandler<P> {
    processor: Arc<P>,
    policy: AckPolicy,
}

impl<P: EntryProcessor> MessageHandler<P> {
    pub fn new(processor: Arc<P>, policy: AckPolicy) -> Self {
        Self { processor, policy }
    }

    /// Handle one delivered payload. Decode failures are terminal: a payload
    /// that does not parse today will not parse on redelivery either.
    pub async fn handle(&self, payload: &[u8], message_id: &str) -> ProcessingOutcome {
        if payload.is_empty() {
            return ProcessingOutcome::UnprocessableReason("empty payload".to_string());
        }
        let entry: MediaEntry = match serde_json::from_slice(payload) {
            Ok(entry) => entry,
            Err(e) => {
                return ProcessingOutcome::UnprocessableError(
                    anyhow::Error::new(e).context("failed to decode media entry payload"),
                )
            }
        };
        match self.processor.process(&entry, message_id).await {
            Ok(status) => self.policy.outcome(status),
            Err(e) => ProcessingOutcome::FailureError(
                anyhow::Error::new(e).context("media entry processing faulted"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use mediaq_processor::ProcessorResult;

    use super::*;

    struct StatusProcessor(i32);

    #[async_trait]
    impl EntryProcessor for StatusProcessor {
        async fn process(&self, _entry: &MediaEntry, _message_id: &str) -> ProcessorResult<i32> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn empty_payload_is_unprocessable() {
        let handler = MessageHandler::new(Arc::new(StatusProcessor(200)), AckPolicy::default());
        let outcome = handler.handle(b"", "m1").await;
        assert!(matches!(outcome, ProcessingOutcome::UnprocessableReason(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_unprocessable() {
        let handler = MessageHandler::new(Arc::new(StatusProcessor(200)), AckPolicy::default());
        let outcome = handler.handle(b"not json", "m1").await;
        assert!(matches!(outcome, ProcessingOutcome::UnprocessableError(_)));
        assert!(outcome.should_ack());
    }

    #[tokio::test]
    async fn status_flows_through_the_policy() {
        let handler = MessageHandler::new(Arc::new(StatusProcessor(400)), AckPolicy::default());
        let outcome = handler.handle(b"{\"entryType\":\"image\"}", "m1").await;
        assert!(!outcome.should_ack());
    }
}
