//! Media queue worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mediaq_processor::{MediaEntryProcessor, ProcessorConfig};
use mediaq_queue::{MqttConfig, PubSubClient, RumqttcTransport};
use mediaq_worker::{DeliveryMode, MqttPushConsumer, PullConsumerPool, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("mediaq=info".parse().unwrap())
        .add_directive("rumqttc=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting mediaq-worker");

    let config = match WorkerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load worker config: {}", e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", config);

    let processor_config = match ProcessorConfig::from_env() {
        Some(c) => c,
        None => {
            error!("IMAGES_ENDPOINT and VIDEOS_ENDPOINT must be set");
            std::process::exit(1);
        }
    };
    let processor = match MediaEntryProcessor::new(&processor_config) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create entry processor: {}", e);
            std::process::exit(1);
        }
    };

    match config.delivery {
        DeliveryMode::Pull => {
            let subscriber = match PubSubClient::from_env() {
                Ok(s) => s,
                Err(e) => {
                    error!("Failed to create pull subscriber: {}", e);
                    std::process::exit(1);
                }
            };
            let pool = Arc::new(PullConsumerPool::new(subscriber, processor, &config));

            let shutdown = tokio::spawn({
                let pool = Arc::clone(&pool);
                async move {
                    tokio::signal::ctrl_c().await.ok();
                    info!("Received shutdown signal");
                    pool.shutdown();
                }
            });

            if let Err(e) = pool.run().await {
                error!("Consumer pool error: {}", e);
                std::process::exit(1);
            }
            shutdown.abort();
        }
        DeliveryMode::Mqtt => {
            let transport = RumqttcTransport::new(MqttConfig::from_env());
            let consumer = Arc::new(MqttPushConsumer::new(transport, processor, &config));

            let shutdown = tokio::spawn({
                let consumer = Arc::clone(&consumer);
                async move {
                    tokio::signal::ctrl_c().await.ok();
                    info!("Received shutdown signal");
                    if let Err(e) = consumer.stop().await {
                        error!("Failed to stop MQTT consumer: {}", e);
                    }
                }
            });

            if let Err(e) = consumer.run().await {
                error!("MQTT consumer error: {}", e);
                std::process::exit(1);
            }
            shutdown.abort();
        }
    }

    info!("Worker shutdown complete");
}
