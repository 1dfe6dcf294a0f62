//! Worker configuration.

use crate::error::{WorkerError, WorkerResult};

/// How jobs are delivered to this worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Pull batches from a Pub/Sub-style subscription.
    Pull,
    /// Receive pushed messages over a persistent MQTT subscription.
    Mqtt,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Job delivery mode
    pub delivery: DeliveryMode,
    /// Number of concurrent processing workers
    pub worker_count: usize,
    /// Messages requested per pull
    pub pull_batch_size: usize,
    /// Status codes at or above this ask for redelivery
    pub retry_threshold: i32,
    /// MQTT topic carrying media entries (MQTT delivery only)
    pub topic: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryMode::Pull,
            worker_count: 24,
            pull_batch_size: 12,
            retry_threshold: 400,
            topic: "media/jobs".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        let delivery = match std::env::var("DELIVERY_MODE").as_deref() {
            Err(_) | Ok("pull") => DeliveryMode::Pull,
            Ok("mqtt") => DeliveryMode::Mqtt,
            Ok(other) => {
                return Err(WorkerError::config(format!(
                    "DELIVERY_MODE must be \"pull\" or \"mqtt\", got \"{other}\""
                )))
            }
        };
        Ok(Self {
            delivery,
            worker_count: std::env::var("WORKER_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.worker_count),
            pull_batch_size: std::env::var("PULL_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pull_batch_size),
            retry_threshold: std::env::var("RETRY_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.retry_threshold),
            topic: std::env::var("MQTT_TOPIC").unwrap_or(defaults.topic),
        })
    }
}
