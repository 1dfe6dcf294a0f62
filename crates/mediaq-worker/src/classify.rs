//! Result classification: turn a [`ProcessingOutcome`] into an ack decision
//! with the matching log line.
//!
//! Classification happens on every delivered message, so visitors are kept in
//! a fixed-size pool sized to the worker count rather than allocated per
//! message. Renting is best-effort: under contention a fresh visitor is built
//! and dropped instead of blocking a worker.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use tracing::{error, info};

use crate::outcome::ProcessingOutcome;

/// Logs one message's outcome and reports whether to acknowledge it.
#[derive(Debug, Default)]
pub struct ResultVisitor {
    message_id: String,
}

impl ResultVisitor {
    /// Rebind the visitor to a new message before reuse.
    pub fn reset(&mut self, message_id: &str) {
        self.message_id.clear();
        self.message_id.push_str(message_id);
    }

    /// Log the outcome; `true` means acknowledge, `false` means leave the
    /// message for redelivery.
    pub fn visit(&self, outcome: &ProcessingOutcome) -> bool {
        match outcome {
            ProcessingOutcome::Success => {
                info!(message_id = %self.message_id, "media entry processed successfully");
                true
            }
            ProcessingOutcome::UnprocessableReason(reason) => {
                error!(
                    message_id = %self.message_id,
                    reason,
                    "media entry is unprocessable, acknowledging without retry"
                );
                true
            }
            ProcessingOutcome::UnprocessableError(e) => {
                error!(
                    message_id = %self.message_id,
                    error = %e,
                    "media entry is unprocessable, acknowledging without retry"
                );
                true
            }
            ProcessingOutcome::FailureReason(reason) => {
                error!(
                    message_id = %self.message_id,
                    reason,
                    "failed to process media entry, message will be redelivered"
                );
                false
            }
            ProcessingOutcome::FailureError(e) => {
                error!(
                    message_id = %self.message_id,
                    error = %e,
                    "failed to process media entry, message will be redelivered"
                );
                false
            }
        }
    }
}

/// Fixed-capacity pool of [`ResultVisitor`]s.
pub struct VisitorPool {
    slots: Mutex<Vec<ResultVisitor>>,
    capacity: usize,
}

impl VisitorPool {
    /// Create a pool prefilled to `capacity`.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, ResultVisitor::default);
        Self {
            slots: Mutex::new(slots),
            capacity,
        }
    }

    /// Classify one outcome, renting a visitor for the duration.
    pub fn classify(&self, message_id: &str, outcome: &ProcessingOutcome) -> bool {
        let mut visitor = self.rent();
        visitor.reset(message_id);
        visitor.visit(outcome)
    }

    fn rent(&self) -> Rented<'_> {
        let visitor = self
            .slots
            .try_lock()
            .ok()
            .and_then(|mut slots| slots.pop())
            .unwrap_or_default();
        Rented {
            pool: self,
            visitor: Some(visitor),
        }
    }

    fn give_back(&self, visitor: ResultVisitor) {
        if let Ok(mut slots) = self.slots.try_lock() {
            if slots.len() < self.capacity {
                slots.push(visitor);
            }
        }
    }
}

/// Pool loan; the visitor goes back on drop, even if `visit` panics.
struct Rented<'a> {
    pool: &'a VisitorPool,
    visitor: Option<ResultVisitor>,
}

impl Deref for Rented<'_> {
    type Target = ResultVisitor;

    fn deref(&self) -> &ResultVisitor {
        self.visitor.as_ref().unwrap()
    }
}

impl DerefMut for Rented<'_> {
    fn deref_mut(&mut self) -> &mut ResultVisitor {
        self.visitor.as_mut().unwrap()
    }
}

impl Drop for Rented<'_> {
    fn drop(&mut self) {
        if let Some(visitor) = self.visitor.take() {
            self.pool.give_back(visitor);
        }
    }
}
