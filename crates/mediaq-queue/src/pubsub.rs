//! Pub/Sub-style pull subscriber client.
//!
//! [`PullSubscriber`] is the pull-delivery seam the consumer pool works
//! against; [`PubSubClient`] implements it over the Google Pub/Sub REST v1
//! API (`subscriptions:pull` / `subscriptions:acknowledge`) with message
//! payloads carried as base64.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_STANDARD};
use chrono::Utc;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};

/// OAuth scope for Pub/Sub access.
pub const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

/// Refresh margin: refresh the token 60 seconds before expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Conservative token TTL when expiry is unknown (50 minutes).
/// OAuth tokens are typically valid for 60 minutes.
const TOKEN_DEFAULT_TTL: Duration = Duration::from_secs(50 * 60);

/// One message handed out by the pull API.
///
/// Owned by the puller until handed to a worker; the worker's only further
/// action on it is acknowledging via `ack_id`. Redelivery on ack-deadline
/// expiry is the broker's concern.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Broker-assigned message identifier.
    pub message_id: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Ack token; present only while the message is un-acked and inside its
    /// visibility window.
    pub ack_id: Option<String>,
}

/// Pull-delivery broker surface: batch pull plus acknowledge.
#[async_trait]
pub trait PullSubscriber: Send + Sync {
    async fn pull(&self, max_messages: usize) -> QueueResult<Vec<ReceivedMessage>>;
    async fn acknowledge(&self, ack_ids: &[String]) -> QueueResult<()>;
}

/// Source of bearer tokens for the REST calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> QueueResult<String>;
}

/// Fixed token, for emulators and tests.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> QueueResult<String> {
        Ok(self.0.clone())
    }
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

/// Service-account token source with a cached, margin-refreshed token.
pub struct GcpTokenSource {
    provider: Arc<dyn TokenProvider>,
    cache: RwLock<Option<CachedToken>>,
}

impl GcpTokenSource {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(None),
        }
    }

    /// Build from `GOOGLE_APPLICATION_CREDENTIALS`.
    pub fn from_env() -> QueueResult<Self> {
        let service_account = CustomServiceAccount::from_env()
            .map_err(|e| QueueError::auth(format!("failed to load service account: {e}")))?;
        match service_account {
            Some(sa) => Ok(Self::new(Arc::new(sa))),
            None => Err(QueueError::auth(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }
}

#[async_trait]
impl TokenSource for GcpTokenSource {
    async fn token(&self) -> QueueResult<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the write lock.
        if let Some(cached) = cache.as_ref() {
            if cached.is_valid() {
                return Ok(cached.access_token.clone());
            }
        }

        let token = self
            .provider
            .token(&[PUBSUB_SCOPE])
            .await
            .map_err(|e| QueueError::auth(format!("failed to obtain auth token: {e}")))?;
        let access_token = token.as_str().to_string();

        // Prefer the real expiry from gcp_auth, fall back to a conservative default.
        let expires_at = {
            let now = Utc::now();
            let exp = token.expires_at();

            if exp > now {
                match (exp - now).to_std() {
                    Ok(ttl) => Instant::now() + ttl,
                    Err(_) => Instant::now() + TOKEN_DEFAULT_TTL,
                }
            } else {
                // Treat already-expired tokens as having a near-immediate expiry so we
                // force refresh on the next request.
                Instant::now()
            }
        };

        *cache = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at,
        });
        debug!("refreshed Pub/Sub auth token");
        Ok(access_token)
    }
}

/// Pub/Sub subscription configuration.
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// GCP project ID
    pub project_id: String,
    /// Subscription ID
    pub subscription_id: String,
    /// API endpoint; overridable for emulators and tests
    pub endpoint: String,
    /// Request timeout
    pub timeout: Duration,
}

impl PubSubConfig {
    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .map_err(|_| QueueError::auth("GCP_PROJECT_ID must be set"))?;
        let subscription_id = std::env::var("PUBSUB_SUBSCRIPTION_ID")
            .map_err(|_| QueueError::auth("PUBSUB_SUBSCRIPTION_ID must be set"))?;
        Ok(Self {
            project_id,
            subscription_id,
            endpoint: std::env::var("PUBSUB_ENDPOINT")
                .unwrap_or_else(|_| "https://pubsub.googleapis.com".to_string()),
            timeout: Duration::from_secs(
                std::env::var("PUBSUB_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(90),
            ),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<RawReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceivedMessage {
    #[serde(default)]
    ack_id: Option<String>,
    #[serde(default)]
    message: Option<RawPubSubMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPubSubMessage {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

/// Pub/Sub REST pull client.
pub struct PubSubClient {
    http: Client,
    config: PubSubConfig,
    token_source: Arc<dyn TokenSource>,
}

impl PubSubClient {
    pub fn new(config: PubSubConfig, token_source: Arc<dyn TokenSource>) -> QueueResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("mediaq-queue/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(QueueError::Network)?;
        Ok(Self {
            http,
            config,
            token_source,
        })
    }

    /// Create from environment variables with service-account auth.
    pub fn from_env() -> QueueResult<Self> {
        let config = PubSubConfig::from_env()?;
        let token_source = Arc::new(GcpTokenSource::from_env()?);
        Self::new(config, token_source)
    }

    fn subscription_url(&self, action: &str) -> String {
        format!(
            "{}/v1/projects/{}/subscriptions/{}:{}",
            self.config.endpoint, self.config.project_id, self.config.subscription_id, action
        )
    }
}

#[async_trait]
impl PullSubscriber for PubSubClient {
    async fn pull(&self, max_messages: usize) -> QueueResult<Vec<ReceivedMessage>> {
        let token = self.token_source.token().await?;
        let response = self
            .http
            .post(self.subscription_url("pull"))
            .bearer_auth(token)
            .json(&PullRequest { max_messages })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::pull_failed(format!("{status}: {body}")));
        }

        let parsed: PullResponse = response.json().await?;
        let mut messages = Vec::with_capacity(parsed.received_messages.len());
        for raw in parsed.received_messages {
            let message = raw.message.unwrap_or(RawPubSubMessage {
                data: None,
                message_id: None,
            });
            let message_id = message.message_id.unwrap_or_default();
            // Decode failures stay per-message: the raw bytes flow on to the
            // consumer, which classifies an undecodable payload as
            // unprocessable and acknowledges it. A poison message must not
            // take down the rest of its batch.
            let payload = match message.data {
                Some(data) => match BASE64_STANDARD.decode(data.as_bytes()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(message_id = %message_id, error = %e, "payload is not valid base64");
                        data.into_bytes()
                    }
                },
                None => Vec::new(),
            };
            messages.push(ReceivedMessage {
                message_id,
                payload,
                ack_id: raw.ack_id,
            });
        }
        debug!(count = messages.len(), "pulled messages");
        Ok(messages)
    }

    async fn acknowledge(&self, ack_ids: &[String]) -> QueueResult<()> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        let token = self.token_source.token().await?;
        let response = self
            .http
            .post(self.subscription_url("acknowledge"))
            .bearer_auth(token)
            .json(&AcknowledgeRequest { ack_ids })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::acknowledge_failed(format!("{status}: {body}")));
        }
        Ok(())
    }
}
