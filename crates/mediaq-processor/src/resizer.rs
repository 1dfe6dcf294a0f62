//! HTTP clients for the external image and video resizer services.
//!
//! The resizers are separate deployments reached over the network; this crate
//! only knows their job-submission surface. A job is a single POST carrying
//! the resolved source/target URIs and the resize options; errors come back
//! as a JSON body with an `error` code that maps onto the terminal/retryable
//! split in [`ProcessorError`].

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProcessorError, ProcessorResult};
use crate::resource::MediaResource;

/// Options forwarded to a resizer service.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resize_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_y: Option<i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResizeRequest<'a> {
    source: String,
    target: String,
    options: &'a ResizeOptions,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ResizerErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Thin client for one resizer deployment (image or video).
pub struct ResizerClient {
    http: Client,
    endpoint: String,
}

impl ResizerClient {
    /// Create a client for the service at `endpoint` with the given request
    /// timeout (video jobs can legitimately run for hours).
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> ProcessorResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("mediaq-processor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ProcessorError::Network)?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    /// Submit a resize job and wait for completion.
    pub async fn resize(
        &self,
        source: &MediaResource,
        target: &MediaResource,
        options: &ResizeOptions,
    ) -> ProcessorResult<()> {
        self.submit("resize", source, target, options).await
    }

    /// Submit a thumbnail-extraction job and wait for completion.
    pub async fn thumbnail(
        &self,
        source: &MediaResource,
        target: &MediaResource,
        options: &ResizeOptions,
    ) -> ProcessorResult<()> {
        self.submit("thumbnail", source, target, options).await
    }

    async fn submit(
        &self,
        operation: &str,
        source: &MediaResource,
        target: &MediaResource,
        options: &ResizeOptions,
    ) -> ProcessorResult<()> {
        let request = ResizeRequest {
            source: source.as_uri(),
            target: target.as_uri(),
            options,
        };
        let response = self
            .http
            .post(format!("{}/{operation}", self.endpoint))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(%source, %target, operation, "resizer job completed");
            return Ok(());
        }

        let body: ResizerErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .message
            .unwrap_or_else(|| format!("resizer answered {status}"));
        Err(match body.error.as_deref() {
            Some("InvalidMedia") | Some("InvalidImage") => ProcessorError::InvalidMedia(message),
            Some("UnsupportedMediaType") => ProcessorError::UnsupportedMediaType(message),
            Some("UnsupportedResizeMode") => ProcessorError::UnsupportedResizeMode(message),
            _ => ProcessorError::Rejected(format!("{status}: {message}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn file(p: &str) -> MediaResource {
        MediaResource::File(p.to_string())
    }

    #[tokio::test]
    async fn resize_posts_uris_and_options() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resize"))
            .and(body_partial_json(json!({
                "source": "file:///in/a.png",
                "target": "file:///out/a.jpg",
                "options": { "width": 320, "resizeMode": "inbox" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ResizerClient::new(server.uri(), Duration::from_secs(2)).expect("client");
        let options = ResizeOptions {
            width: Some(320),
            resize_mode: Some("inbox".to_string()),
            ..Default::default()
        };
        client
            .resize(&file("/in/a.png"), &file("/out/a.jpg"), &options)
            .await
            .expect("resize");
    }

    #[tokio::test]
    async fn error_codes_map_to_terminal_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resize"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "error": "InvalidImage",
                "message": "corrupt png header"
            })))
            .mount(&server)
            .await;

        let client = ResizerClient::new(server.uri(), Duration::from_secs(2)).expect("client");
        let err = client
            .resize(&file("/in/a.png"), &file("/out/a.jpg"), &ResizeOptions::default())
            .await
            .expect_err("must fail");
        assert!(matches!(err, ProcessorError::InvalidMedia(_)));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn unclassified_errors_are_retryable_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/thumbnail"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = ResizerClient::new(server.uri(), Duration::from_secs(2)).expect("client");
        let err = client
            .thumbnail(&file("/in/a.mp4"), &file("/out/a.png"), &ResizeOptions::default())
            .await
            .expect_err("must fail");
        assert!(matches!(err, ProcessorError::Rejected(_)));
        assert!(!err.is_terminal());
    }
}
