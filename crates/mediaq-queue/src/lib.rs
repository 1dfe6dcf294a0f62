//! Broker connectivity and bulk enqueue engine for the media processing queue.
//!
//! This crate provides:
//! - Bulk enqueue with partial-failure aggregation and bounded retry
//! - The persistent MQTT connection lifecycle shared by producer and consumer
//! - A Pub/Sub-style pull client for pull delivery

pub mod enqueue;
pub mod error;
pub mod mqtt;
pub mod pubsub;
pub mod transport;

pub use enqueue::{enqueue_all, enqueue_many, BulkEnqueueFailure, BulkEnqueueResult, MediaQueue};
pub use error::{QueueError, QueueResult};
pub use mqtt::{InboundMessage, MqttConnection, MqttMediaQueue};
pub use pubsub::{
    GcpTokenSource, PubSubClient, PubSubConfig, PullSubscriber, ReceivedMessage, StaticToken,
    TokenSource,
};
pub use transport::{DisconnectReason, MqttConfig, MqttTransport, RumqttcTransport, TransportEvent};
