//! Persistent MQTT connection lifecycle, shared by producer and consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use async_trait::async_trait;
use mediaq_models::MediaEntry;

use crate::enqueue::MediaQueue;
use crate::error::{QueueError, QueueResult};
use crate::transport::{DisconnectReason, MqttTransport, TransportEvent};

/// Inbound application message forwarded to the consumer (subscriber role).
#[derive(Debug)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

struct ActiveClient {
    event_task: JoinHandle<()>,
}

/// Owns the lifecycle of one persistent broker client: start, auto-reconnect,
/// publish, subscribe, stop.
///
/// `start`/`stop` are serialized by a single-slot guard; calling either when
/// the connection is already in the requested state is a warn-level no-op.
/// Transport events arrive on a channel consumed by a task owned by this
/// connection, so callbacks never mutate state from the transport's thread;
/// `linked` is the one flag publishers read concurrently.
pub struct MqttConnection<T: MqttTransport> {
    transport: Arc<T>,
    topic: String,
    subscribe_on_connect: bool,
    inbound: Option<mpsc::UnboundedSender<InboundMessage>>,
    started: Arc<AtomicBool>,
    linked: Arc<AtomicBool>,
    state: Mutex<Option<ActiveClient>>,
}

impl<T: MqttTransport> MqttConnection<T> {
    /// Create a publisher connection for `topic`.
    pub fn new(transport: T, topic: impl Into<String>) -> Self {
        Self {
            transport: Arc::new(transport),
            topic: topic.into(),
            subscribe_on_connect: false,
            inbound: None,
            started: Arc::new(AtomicBool::new(false)),
            linked: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(None),
        }
    }

    /// Turn this into a subscriber connection: the topic filter is subscribed
    /// at QoS 1 on every (re)connect and inbound messages are forwarded to
    /// `inbound`.
    pub fn into_subscriber(mut self, inbound: mpsc::UnboundedSender<InboundMessage>) -> Self {
        self.subscribe_on_connect = true;
        self.inbound = Some(inbound);
        self
    }

    /// Whether the transport currently reports a live link.
    pub fn is_linked(&self) -> bool {
        self.linked.load(Ordering::SeqCst)
    }

    /// Connect and begin driving transport events.
    ///
    /// No-op (with a warning) when already started.
    pub async fn start(&self) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            warn!("MQTT connection is already running");
            return Ok(());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.transport.connect(events_tx.clone()).await?;

        let event_task = tokio::spawn(drive_events(
            Arc::clone(&self.transport),
            events_rx,
            events_tx,
            Arc::clone(&self.linked),
            self.topic.clone(),
            self.subscribe_on_connect,
            self.inbound.clone(),
        ));
        *state = Some(ActiveClient { event_task });
        self.started.store(true, Ordering::SeqCst);
        debug!("MQTT connection started");
        Ok(())
    }

    /// Disconnect with an administrative reason and discard the client.
    ///
    /// No-op (with a warning) when not running.
    pub async fn stop(&self) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        match state.take() {
            None => {
                warn!("MQTT connection is not running");
                Ok(())
            }
            Some(active) => {
                self.started.store(false, Ordering::SeqCst);
                let result = self
                    .transport
                    .disconnect(DisconnectReason::Administrative)
                    .await;
                self.linked.store(false, Ordering::SeqCst);
                active.event_task.abort();
                debug!("MQTT connection stopped");
                result
            }
        }
    }

    /// Serialize `payload` as JSON and publish it at QoS 1.
    ///
    /// Fails with [`QueueError::NotStarted`] before `start` and with
    /// [`QueueError::NotConnected`] while the link is down.
    pub async fn publish<P: Serialize>(&self, payload: &P) -> QueueResult<Option<u16>> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(QueueError::NotStarted);
        }
        if !self.linked.load(Ordering::SeqCst) {
            return Err(QueueError::NotConnected);
        }
        let bytes = serde_json::to_vec(payload)?;
        self.transport.publish(&self.topic, bytes).await
    }
}

/// Event loop owned by the connection: updates `linked`, re-subscribes on
/// connect, reconnects on unexpected drops, forwards inbound messages.
async fn drive_events<T: MqttTransport>(
    transport: Arc<T>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    linked: Arc<AtomicBool>,
    topic: String,
    subscribe_on_connect: bool,
    inbound: Option<mpsc::UnboundedSender<InboundMessage>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => {
                if subscribe_on_connect {
                    match transport.subscribe(&topic).await {
                        Ok(()) => debug!(topic, "subscribed"),
                        Err(e) => error!(error = %e, topic, "subscribe after connect failed"),
                    }
                }
                linked.store(true, Ordering::SeqCst);
                debug!("MQTT client connected");
            }
            TransportEvent::Disconnected {
                administrative,
                reason,
            } => {
                linked.store(false, Ordering::SeqCst);
                if administrative {
                    debug!(reason, "MQTT client disconnected administratively");
                } else {
                    warn!(reason, "MQTT client disconnected unexpectedly, reconnecting");
                    if let Err(e) = transport.connect(events_tx.clone()).await {
                        error!(error = %e, "reconnect attempt failed");
                    }
                }
            }
            TransportEvent::Message { topic, payload } => {
                if let Some(tx) = &inbound {
                    let _ = tx.send(InboundMessage { topic, payload });
                }
            }
        }
    }
}

/// MQTT-backed producer queue: one entry per publish, JSON on the wire.
pub struct MqttMediaQueue<T: MqttTransport> {
    connection: Arc<MqttConnection<T>>,
}

impl<T: MqttTransport> MqttMediaQueue<T> {
    pub fn new(connection: Arc<MqttConnection<T>>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl<T: MqttTransport> MediaQueue for MqttMediaQueue<T> {
    async fn enqueue(&self, entry: &MediaEntry) -> QueueResult<()> {
        let message_id = self.connection.publish(entry).await?;
        info!(
            entry_type = %entry.entry_type,
            source = entry.source.as_deref().unwrap_or("<none>"),
            ?message_id,
            "enqueued media entry"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;

    /// Transport fake that records calls and hands the test the event sender
    /// so connect/disconnect callbacks can be simulated.
    #[derive(Default)]
    struct FakeTransport {
        connects: AtomicUsize,
        disconnects: StdMutex<Vec<DisconnectReason>>,
        subscriptions: StdMutex<Vec<String>>,
        published: StdMutex<Vec<(String, Vec<u8>)>>,
        events: StdMutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    }

    impl FakeTransport {
        fn send(&self, event: TransportEvent) {
            let events = self.events.lock().unwrap();
            events
                .as_ref()
                .expect("transport not connected")
                .send(event)
                .expect("event channel closed");
        }

        fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MqttTransport for Arc<FakeTransport> {
        async fn connect(
            &self,
            events: mpsc::UnboundedSender<TransportEvent>,
        ) -> QueueResult<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            *self.events.lock().unwrap() = Some(events);
            Ok(())
        }

        async fn disconnect(&self, reason: DisconnectReason) -> QueueResult<()> {
            self.disconnects.lock().unwrap().push(reason);
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> QueueResult<Option<u16>> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(Some(7))
        }

        async fn subscribe(&self, topic: &str) -> QueueResult<()> {
            self.subscriptions.lock().unwrap().push(topic.to_string());
            Ok(())
        }
    }

    async fn settle() {
        // Let the event task observe pending channel messages.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn publish_before_start_fails_with_not_started() {
        let transport = Arc::new(FakeTransport::default());
        let connection = MqttConnection::new(Arc::clone(&transport), "media/jobs");

        let err = connection
            .publish(&MediaEntry::image())
            .await
            .expect_err("publish must fail before start");
        assert!(matches!(err, QueueError::NotStarted));
    }

    #[tokio::test]
    async fn publish_before_connected_event_fails_with_not_connected() {
        let transport = Arc::new(FakeTransport::default());
        let connection = MqttConnection::new(Arc::clone(&transport), "media/jobs");
        connection.start().await.expect("start");

        let err = connection
            .publish(&MediaEntry::image())
            .await
            .expect_err("publish must fail before the connect ack");
        assert!(matches!(err, QueueError::NotConnected));
    }

    #[tokio::test]
    async fn publish_succeeds_once_linked() {
        let transport = Arc::new(FakeTransport::default());
        let connection = MqttConnection::new(Arc::clone(&transport), "media/jobs");
        connection.start().await.expect("start");
        transport.send(TransportEvent::Connected);
        settle().await;
        assert!(connection.is_linked());

        let entry = MediaEntry::image().with_source("gs://bucket/a.png");
        let message_id = connection.publish(&entry).await.expect("publish");
        assert_eq!(message_id, Some(7));

        let published = transport.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "media/jobs");
        let decoded: MediaEntry = serde_json::from_slice(&published[0].1).expect("wire JSON");
        assert_eq!(decoded, entry);
    }

    #[tokio::test]
    async fn unexpected_disconnect_triggers_reconnect() {
        let transport = Arc::new(FakeTransport::default());
        let connection = MqttConnection::new(Arc::clone(&transport), "media/jobs");
        connection.start().await.expect("start");
        transport.send(TransportEvent::Connected);
        settle().await;
        assert_eq!(transport.connect_count(), 1);

        transport.send(TransportEvent::Disconnected {
            administrative: false,
            reason: "keep-alive timeout".to_string(),
        });
        settle().await;

        assert_eq!(transport.connect_count(), 2);
        assert!(!connection.is_linked());
    }

    #[tokio::test]
    async fn administrative_disconnect_does_not_reconnect() {
        let transport = Arc::new(FakeTransport::default());
        let connection = MqttConnection::new(Arc::clone(&transport), "media/jobs");
        connection.start().await.expect("start");
        transport.send(TransportEvent::Connected);
        settle().await;

        transport.send(TransportEvent::Disconnected {
            administrative: true,
            reason: "shutdown".to_string(),
        });
        settle().await;

        assert_eq!(transport.connect_count(), 1);
        assert!(!connection.is_linked());
    }

    #[tokio::test]
    async fn start_twice_is_a_noop() {
        let transport = Arc::new(FakeTransport::default());
        let connection = MqttConnection::new(Arc::clone(&transport), "media/jobs");
        connection.start().await.expect("start");
        connection.start().await.expect("second start is a no-op");
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn stop_disconnects_administratively() {
        let transport = Arc::new(FakeTransport::default());
        let connection = MqttConnection::new(Arc::clone(&transport), "media/jobs");
        connection.start().await.expect("start");
        transport.send(TransportEvent::Connected);
        settle().await;

        connection.stop().await.expect("stop");
        assert_eq!(
            transport.disconnects.lock().unwrap().as_slice(),
            &[DisconnectReason::Administrative]
        );
        assert!(!connection.is_linked());

        let err = connection
            .publish(&MediaEntry::image())
            .await
            .expect_err("publish after stop must fail");
        assert!(matches!(err, QueueError::NotStarted));
    }

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let transport = Arc::new(FakeTransport::default());
        let connection = MqttConnection::new(Arc::clone(&transport), "media/jobs");
        connection.stop().await.expect("stop without start");
        assert!(transport.disconnects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscriber_role_subscribes_on_every_connect() {
        let transport = Arc::new(FakeTransport::default());
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let connection =
            MqttConnection::new(Arc::clone(&transport), "media/jobs").into_subscriber(inbound_tx);
        connection.start().await.expect("start");
        transport.send(TransportEvent::Connected);
        settle().await;
        assert_eq!(
            transport.subscriptions.lock().unwrap().as_slice(),
            &["media/jobs".to_string()]
        );

        // Drop and reconnect: the filter is re-subscribed.
        transport.send(TransportEvent::Disconnected {
            administrative: false,
            reason: "broker restart".to_string(),
        });
        settle().await;
        transport.send(TransportEvent::Connected);
        settle().await;
        assert_eq!(transport.subscriptions.lock().unwrap().len(), 2);

        // Inbound messages are forwarded.
        transport.send(TransportEvent::Message {
            topic: "media/jobs".to_string(),
            payload: b"{}".to_vec(),
        });
        let message = inbound_rx.recv().await.expect("inbound message");
        assert_eq!(message.payload, b"{}");
    }

    #[tokio::test]
    async fn mqtt_media_queue_publishes_entries() {
        let transport = Arc::new(FakeTransport::default());
        let connection = Arc::new(MqttConnection::new(Arc::clone(&transport), "media/jobs"));
        connection.start().await.expect("start");
        transport.send(TransportEvent::Connected);
        settle().await;

        let queue = MqttMediaQueue::new(Arc::clone(&connection));
        crate::enqueue::MediaQueue::enqueue(&queue, &MediaEntry::video())
            .await
            .expect("enqueue");
        assert_eq!(transport.published.lock().unwrap().len(), 1);
    }
}
