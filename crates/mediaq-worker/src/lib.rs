//! Media queue worker: consumes delivered media entries, runs them through
//! the processing boundary and settles each message per the outcome.

pub mod classify;
pub mod config;
pub mod error;
pub mod handler;
pub mod mqtt_consumer;
pub mod outcome;
pub mod pool;

pub use classify::{ResultVisitor, VisitorPool};
pub use config::{DeliveryMode, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use handler::MessageHandler;
pub use mqtt_consumer::MqttPushConsumer;
pub use outcome::{AckPolicy, ProcessingOutcome};
pub use pool::PullConsumerPool;
