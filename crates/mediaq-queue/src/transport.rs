//! MQTT transport seam.
//!
//! The connection lifecycle in [`crate::mqtt`] is written against the
//! [`MqttTransport`] trait so that reconnect and publish-guard behavior can be
//! exercised without a broker. [`RumqttcTransport`] is the production
//! implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};

/// Reason attached to a disconnect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Intentional operator stop; must not trigger reconnection.
    Administrative,
    /// Anything else.
    Other,
}

/// Connection-state change or inbound message reported by the transport.
///
/// The transport posts these onto a channel owned by the connection instead of
/// mutating shared state from its own network task.
#[derive(Debug)]
pub enum TransportEvent {
    /// The broker acknowledged the connection.
    Connected,
    /// The link dropped. `administrative` is true only for intentional stops.
    Disconnected {
        administrative: bool,
        reason: String,
    },
    /// Inbound application message (subscriber role only).
    Message { topic: String, payload: Vec<u8> },
}

/// Minimal broker client surface the connection lifecycle needs.
#[async_trait]
pub trait MqttTransport: Send + Sync + 'static {
    /// Establish the network connection. Events flow into `events` until the
    /// link drops; each (re)connect receives a sender for the same channel.
    async fn connect(&self, events: mpsc::UnboundedSender<TransportEvent>) -> QueueResult<()>;

    /// Tear the connection down, tagging the reason so the lifecycle can tell
    /// administrative stops from unexpected drops.
    async fn disconnect(&self, reason: DisconnectReason) -> QueueResult<()>;

    /// Publish at QoS 1 (at-least-once). Returns the broker-assigned packet
    /// identifier when the transport exposes one.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> QueueResult<Option<u16>>;

    /// Subscribe to `topic` at QoS 1.
    async fn subscribe(&self, topic: &str) -> QueueResult<()>;
}

/// MQTT client configuration.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client identifier; generated when absent
    pub client_id: Option<String>,
    /// Start with a clean session
    pub clean_session: bool,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            clean_session: true,
            keep_alive_secs: 30,
        }
    }
}

impl MqttConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("MQTT_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1883),
            client_id: std::env::var("MQTT_CLIENT_ID").ok(),
            clean_session: std::env::var("MQTT_CLEAN_SESSION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            keep_alive_secs: std::env::var("MQTT_KEEP_ALIVE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }

    fn options(&self) -> MqttOptions {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("mediaq-{}", Uuid::new_v4()));
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_clean_session(self.clean_session);
        options.set_keep_alive(std::time::Duration::from_secs(self.keep_alive_secs));
        options
    }
}

/// Production transport backed by `rumqttc`.
pub struct RumqttcTransport {
    config: MqttConfig,
    client: Mutex<Option<AsyncClient>>,
    // Set before an administrative disconnect so the poll task can tag the
    // resulting drop correctly.
    admin_stop: Arc<AtomicBool>,
}

impl RumqttcTransport {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            admin_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn active_client(&self) -> QueueResult<AsyncClient> {
        self.client
            .lock()
            .await
            .clone()
            .ok_or_else(|| QueueError::transport("no active MQTT client"))
    }
}

#[async_trait]
impl MqttTransport for RumqttcTransport {
    async fn connect(&self, events: mpsc::UnboundedSender<TransportEvent>) -> QueueResult<()> {
        let (client, mut event_loop) = AsyncClient::new(self.config.options(), 64);
        *self.client.lock().await = Some(client);
        self.admin_stop.store(false, Ordering::SeqCst);

        let admin_stop = Arc::clone(&self.admin_stop);
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        debug!(code = ?ack.code, "MQTT connect acknowledged");
                        if events.send(TransportEvent::Connected).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = TransportEvent::Message {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if events.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let administrative = admin_stop.load(Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Disconnected {
                            administrative,
                            reason: e.to_string(),
                        });
                        // The lifecycle owns reconnection; stop polling here.
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self, reason: DisconnectReason) -> QueueResult<()> {
        if reason == DisconnectReason::Administrative {
            self.admin_stop.store(true, Ordering::SeqCst);
        }
        let client = self.client.lock().await.take();
        match client {
            Some(client) => client
                .disconnect()
                .await
                .map_err(|e| QueueError::transport(e.to_string())),
            None => Ok(()),
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> QueueResult<Option<u16>> {
        let client = self.active_client().await?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| QueueError::PublishRejected(e.to_string()))?;
        // rumqttc tracks QoS 1 packet ids internally and does not expose them.
        Ok(None)
    }

    async fn subscribe(&self, topic: &str) -> QueueResult<()> {
        let client = self.active_client().await?;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| QueueError::transport(e.to_string()))
    }
}
