//! MQTT push consumer.
//!
//! Messages arrive over a persistent subscription held by
//! [`MqttConnection`]; each one runs through the same decode/process/classify
//! path as the pull pool. QoS 1 deliveries are acknowledged by the transport
//! on receipt, so a retryable failure here can only be logged; redelivery on
//! this path depends on the publisher resubmitting.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info};

use mediaq_processor::EntryProcessor;
use mediaq_queue::{InboundMessage, MqttConnection, MqttTransport};

use crate::classify::VisitorPool;
use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::handler::MessageHandler;
use crate::outcome::AckPolicy;

/// Placeholder id for deliveries that carry no broker message id.
const NO_MESSAGE_ID: &str = "<none>";

/// Push-delivery consumer over an MQTT subscription.
pub struct MqttPushConsumer<T: MqttTransport, P> {
    connection: MqttConnection<T>,
    inbound: Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    handler: MessageHandler<P>,
    visitors: VisitorPool,
    shutdown_tx: watch::Sender<bool>,
}

impl<T, P> MqttPushConsumer<T, P>
where
    T: MqttTransport,
    P: EntryProcessor,
{
    pub fn new(transport: T, processor: P, config: &WorkerConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            connection: MqttConnection::new(transport, &config.topic).into_subscriber(inbound_tx),
            inbound: Mutex::new(inbound_rx),
            handler: MessageHandler::new(
                Arc::new(processor),
                AckPolicy::new(config.retry_threshold),
            ),
            visitors: VisitorPool::new(1),
            shutdown_tx,
        }
    }

    /// Start the connection and consume inbound messages until
    /// [`stop`](Self::stop).
    pub async fn run(&self) -> WorkerResult<()> {
        self.connection.start().await?;
        info!("MQTT push consumer started");

        let mut inbound = self.inbound.lock().await;
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                message = inbound.recv() => match message {
                    Some(message) => self.consume(message).await,
                    None => break,
                }
            }
        }
        info!("MQTT push consumer stopped");
        Ok(())
    }

    /// Stop consuming and disconnect.
    pub async fn stop(&self) -> WorkerResult<()> {
        let _ = self.shutdown_tx.send(true);
        self.connection.stop().await?;
        Ok(())
    }

    async fn consume(&self, message: InboundMessage) {
        let outcome = self.handler.handle(&message.payload, NO_MESSAGE_ID).await;
        let acked = self.visitors.classify(NO_MESSAGE_ID, &outcome);
        if !acked {
            debug!(topic = %message.topic, "delivery already settled at QoS 1, cannot nack");
        }
    }
}
