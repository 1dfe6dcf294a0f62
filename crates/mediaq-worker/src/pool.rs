//! Pull consumer pool: one puller task feeding a pool of processing workers.
//!
//! The puller requests batches from the subscription and fans them out over
//! an unbounded channel; each worker decodes, processes, classifies and acks
//! its own messages. Redelivery is entirely the broker's job: a message that
//! is not acknowledged comes back when its ack deadline expires, so the pool
//! keeps no retry state of its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mediaq_processor::EntryProcessor;
use mediaq_queue::{PullSubscriber, ReceivedMessage};

use crate::classify::VisitorPool;
use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::handler::MessageHandler;
use crate::outcome::AckPolicy;

/// Pause after an empty batch, to avoid hammering an idle subscription.
const IDLE_BACKOFF: Duration = Duration::from_millis(200);

/// Pause after a failed pull before trying again.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Concurrent pull consumer over a [`PullSubscriber`].
pub struct PullConsumerPool<S, P> {
    subscriber: Arc<S>,
    handler: Arc<MessageHandler<P>>,
    visitors: Arc<VisitorPool>,
    worker_count: usize,
    batch_size: usize,
    shutdown_tx: watch::Sender<bool>,
}

impl<S, P> PullConsumerPool<S, P>
where
    S: PullSubscriber + 'static,
    P: EntryProcessor + 'static,
{
    pub fn new(subscriber: S, processor: P, config: &WorkerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            subscriber: Arc::new(subscriber),
            handler: Arc::new(MessageHandler::new(
                Arc::new(processor),
                AckPolicy::new(config.retry_threshold),
            )),
            visitors: Arc::new(VisitorPool::new(config.worker_count)),
            worker_count: config.worker_count,
            batch_size: config.pull_batch_size,
            shutdown_tx,
        }
    }

    /// Run the puller and workers until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            workers = self.worker_count,
            batch_size = self.batch_size,
            "starting pull consumer pool"
        );

        let (tx, rx) = flume::unbounded::<ReceivedMessage>();

        let puller = tokio::spawn(puller_loop(
            Arc::clone(&self.subscriber),
            tx,
            self.batch_size,
            self.shutdown_tx.subscribe(),
        ));

        let workers: Vec<JoinHandle<()>> = (0..self.worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    Arc::clone(&self.subscriber),
                    Arc::clone(&self.handler),
                    Arc::clone(&self.visitors),
                    rx.clone(),
                    self.shutdown_tx.subscribe(),
                    worker_id,
                ))
            })
            .collect();
        drop(rx);

        puller.await.ok();
        for worker in workers {
            worker.await.ok();
        }
        info!("pull consumer pool stopped");
        Ok(())
    }

    /// Ask the puller and all workers to stop. Messages already handed to a
    /// worker finish processing before it exits.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn puller_loop<S: PullSubscriber>(
    subscriber: Arc<S>,
    tx: flume::Sender<ReceivedMessage>,
    batch_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            result = subscriber.pull(batch_size) => match result {
                Ok(messages) => {
                    let idle = messages.is_empty();
                    for message in messages {
                        if tx.send(message).is_err() {
                            return;
                        }
                    }
                    if idle {
                        tokio::time::sleep(IDLE_BACKOFF).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "pull failed, backing off");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }
    debug!("puller stopped");
}

async fn worker_loop<S: PullSubscriber, P: EntryProcessor>(
    subscriber: Arc<S>,
    handler: Arc<MessageHandler<P>>,
    visitors: Arc<VisitorPool>,
    rx: flume::Receiver<ReceivedMessage>,
    mut shutdown: watch::Receiver<bool>,
    worker_id: usize,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            message = rx.recv_async() => match message {
                Ok(message) => {
                    handle_message(subscriber.as_ref(), &handler, &visitors, message).await;
                }
                Err(_) => break,
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

async fn handle_message<S: PullSubscriber, P: EntryProcessor>(
    subscriber: &S,
    handler: &MessageHandler<P>,
    visitors: &VisitorPool,
    message: ReceivedMessage,
) {
    let outcome = handler.handle(&message.payload, &message.message_id).await;
    if !visitors.classify(&message.message_id, &outcome) {
        return;
    }
    match &message.ack_id {
        Some(ack_id) => {
            if let Err(e) = subscriber.acknowledge(std::slice::from_ref(ack_id)).await {
                // Nothing to do beyond logging; the broker will redeliver and
                // the next delivery acks again.
                error!(
                    message_id = %message.message_id,
                    error = %e,
                    "failed to acknowledge message"
                );
            }
        }
        None => {
            warn!(
                message_id = %message.message_id,
                "message carries no ack id, skipping acknowledgement"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use mediaq_models::MediaEntry;
    use mediaq_processor::ProcessorResult;
    use mediaq_queue::QueueResult;

    use super::*;

    #[derive(Default)]
    struct FakeSubscriber {
        batches: Mutex<VecDeque<Vec<ReceivedMessage>>>,
        acked: Mutex<Vec<String>>,
    }

    /// Newtype so the foreign trait can be implemented for a shared fake
    /// without tripping the orphan rule.
    struct SharedSubscriber(Arc<FakeSubscriber>);

    #[async_trait]
    impl PullSubscriber for SharedSubscriber {
        async fn pull(&self, _max_messages: usize) -> QueueResult<Vec<ReceivedMessage>> {
            Ok(self.0.batches.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn acknowledge(&self, ack_ids: &[String]) -> QueueResult<()> {
            self.0.acked.lock().unwrap().extend_from_slice(ack_ids);
            Ok(())
        }
    }

    /// Returns a per-source status and records which messages it saw.
    struct FakeProcessor {
        statuses: HashMap<String, i32>,
        processed: Mutex<Vec<String>>,
    }

    struct SharedProcessor(Arc<FakeProcessor>);

    #[async_trait]
    impl EntryProcessor for SharedProcessor {
        async fn process(&self, entry: &MediaEntry, message_id: &str) -> ProcessorResult<i32> {
            self.0.processed.lock().unwrap().push(message_id.to_string());
            let source = entry.source.as_deref().unwrap_or_default();
            Ok(*self.0.statuses.get(source).unwrap_or(&200))
        }
    }

    fn message(id: &str, payload: &[u8], ack_id: Option<&str>) -> ReceivedMessage {
        ReceivedMessage {
            message_id: id.to_string(),
            payload: payload.to_vec(),
            ack_id: ack_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn processes_each_message_once_and_acks_per_outcome() {
        let subscriber = Arc::new(FakeSubscriber::default());
        subscriber.batches.lock().unwrap().push_back(vec![
            message(
                "m1",
                br#"{"entryType":"image","source":"ok"}"#,
                Some("a1"),
            ),
            message(
                "m2",
                br#"{"entryType":"image","source":"retry"}"#,
                Some("a2"),
            ),
            message("m3", b"garbage", Some("a3")),
            message("m4", br#"{"entryType":"image","source":"ok"}"#, None),
        ]);
        let processor = Arc::new(FakeProcessor {
            statuses: HashMap::from([("ok".to_string(), 200), ("retry".to_string(), 400)]),
            processed: Mutex::new(Vec::new()),
        });

        let config = WorkerConfig {
            worker_count: 3,
            pull_batch_size: 12,
            ..WorkerConfig::default()
        };
        let pool = Arc::new(PullConsumerPool::new(
            SharedSubscriber(Arc::clone(&subscriber)),
            SharedProcessor(Arc::clone(&processor)),
            &config,
        ));

        let runner = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.run().await }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        pool.shutdown();
        runner.await.expect("join").expect("run");

        // Only the decodable payloads reach the processor, each exactly once.
        let mut processed = processor.processed.lock().unwrap().clone();
        processed.sort();
        assert_eq!(processed, vec!["m1", "m2", "m4"]);

        // Ack: success and unparseable yes, retryable failure no. The ack-less
        // success cannot be acknowledged at all.
        let mut acked = subscriber.acked.lock().unwrap().clone();
        acked.sort();
        assert_eq!(acked, vec!["a1", "a3"]);
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_pool() {
        let subscriber = Arc::new(FakeSubscriber::default());
        let processor = Arc::new(FakeProcessor {
            statuses: HashMap::new(),
            processed: Mutex::new(Vec::new()),
        });
        let config = WorkerConfig {
            worker_count: 2,
            ..WorkerConfig::default()
        };
        let pool = Arc::new(PullConsumerPool::new(
            SharedSubscriber(subscriber),
            SharedProcessor(processor),
            &config,
        ));

        let runner = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.run().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.shutdown();
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("pool must stop after shutdown")
            .expect("join")
            .expect("run");
    }
}
