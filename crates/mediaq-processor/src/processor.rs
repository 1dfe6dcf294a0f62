//! Media entry processor: the job-processing boundary.
//!
//! Given a deserialized entry and a broker message id, resolves the entry's
//! resources and drives the matching resizer service, reporting the outcome as
//! a status code: anything below 400 is terminal (success or unprocessable,
//! do not redeliver), 400 and above asks for redelivery.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use mediaq_models::{EntryKind, MediaEntry};

use crate::error::ProcessorResult;
use crate::resizer::{ResizeOptions, ResizerClient};
use crate::resource::{resolve_source, resolve_target};

/// Status codes reported by the processing boundary.
pub mod status {
    /// Processed successfully.
    pub const OK: i32 = 200;
    /// Terminal without output: unprocessable entry, or a video job whose
    /// failure policy is currently "do not redeliver".
    pub const NO_CONTENT: i32 = 204;
    /// Transient failure; the message may be redelivered.
    pub const RETRY: i32 = 400;
}

/// Processing boundary consumed by both push and pull delivery paths.
#[async_trait]
pub trait EntryProcessor: Send + Sync {
    /// Process one entry. Implementations map their own failures onto status
    /// codes; an `Err` is reserved for faults that escaped that mapping and
    /// is treated as retry-eligible by the caller.
    async fn process(&self, entry: &MediaEntry, message_id: &str) -> ProcessorResult<i32>;
}

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Image resizer service endpoint
    pub image_endpoint: String,
    /// Video resizer service endpoint
    pub video_endpoint: String,
    /// Image job timeout
    pub image_timeout: Duration,
    /// Video job timeout (transcodes can run for hours)
    pub video_timeout: Duration,
}

impl ProcessorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            image_endpoint: std::env::var("IMAGES_ENDPOINT").ok()?,
            video_endpoint: std::env::var("VIDEOS_ENDPOINT").ok()?,
            image_timeout: Duration::from_secs(
                std::env::var("IMAGES_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15 * 60),
            ),
            video_timeout: Duration::from_secs(
                std::env::var("VIDEOS_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120 * 60),
            ),
        })
    }
}

/// Video resize modes the video service accepts.
const VIDEO_RESIZE_MODES: [&str; 3] = ["inbox", "exact", "none"];

/// Production processor dispatching entries to the resizer services.
pub struct MediaEntryProcessor {
    images: ResizerClient,
    videos: ResizerClient,
}

impl MediaEntryProcessor {
    pub fn new(config: &ProcessorConfig) -> ProcessorResult<Self> {
        Ok(Self {
            images: ResizerClient::new(&config.image_endpoint, config.image_timeout)?,
            videos: ResizerClient::new(&config.video_endpoint, config.video_timeout)?,
        })
    }

    fn options_for(entry: &MediaEntry, resize_mode: Option<String>) -> ResizeOptions {
        ResizeOptions {
            target_type: entry.target_type.clone(),
            width: entry.target_width,
            height: entry.target_height,
            resize_mode,
            weight_x: entry.weight_x,
            weight_y: entry.weight_y,
        }
    }

    async fn process_image(&self, entry: &MediaEntry, message_id: &str) -> i32 {
        let source = match resolve_source(entry.source.as_deref(), message_id) {
            Ok(source) => source,
            Err(reason) => {
                error!(message_id, "failed to resolve source: {reason}");
                return status::NO_CONTENT;
            }
        };
        let target = match resolve_target(entry.target.as_deref(), message_id) {
            Ok(target) => target,
            Err(reason) => {
                error!(message_id, "failed to resolve target: {reason}");
                return status::NO_CONTENT;
            }
        };

        let options = Self::options_for(entry, entry.operation.clone());
        match self.images.resize(&source, &target, &options).await {
            Ok(()) => {
                info!(message_id, %source, %target, "processed image entry");
                status::OK
            }
            Err(e) if e.is_terminal() => {
                error!(message_id, error = %e, "failed to process image entry");
                status::NO_CONTENT
            }
            Err(e) => {
                error!(message_id, error = %e, "failed to process image entry, operation may be retried");
                status::RETRY
            }
        }
    }

    async fn process_video(&self, entry: &MediaEntry, message_id: &str) -> i32 {
        let source = match resolve_source(entry.source.as_deref(), message_id) {
            Ok(source) => source,
            Err(reason) => {
                error!(message_id, "failed to resolve source: {reason}");
                return status::NO_CONTENT;
            }
        };
        let target = match resolve_target(entry.target.as_deref(), message_id) {
            Ok(target) => target,
            Err(reason) => {
                error!(message_id, "failed to resolve target: {reason}");
                return status::NO_CONTENT;
            }
        };

        let operation = entry.operation.as_deref().unwrap_or("");
        if operation.is_empty() || VIDEO_RESIZE_MODES.contains(&operation) {
            let mode = if operation.is_empty() { "none" } else { operation };
            let options = Self::options_for(entry, Some(mode.to_string()));
            match self.videos.resize(&source, &target, &options).await {
                Ok(()) => {
                    info!(message_id, %source, %target, "processed video entry");
                    status::NO_CONTENT
                }
                Err(e) => {
                    // TODO: distinguish retryable video failures from terminal
                    // ones; until then every video failure is terminal.
                    error!(message_id, error = %e, "failed to process video entry");
                    status::NO_CONTENT
                }
            }
        } else if operation == "thumbnail" {
            let options = ResizeOptions {
                width: entry.target_width,
                height: entry.target_height,
                resize_mode: Some("inbox".to_string()),
                ..Default::default()
            };
            match self.videos.thumbnail(&source, &target, &options).await {
                Ok(()) => {
                    info!(message_id, %source, %target, "created video thumbnail");
                    status::NO_CONTENT
                }
                Err(e) => {
                    error!(message_id, error = %e, "failed to create video thumbnail");
                    status::NO_CONTENT
                }
            }
        } else {
            error!(message_id, operation, "unsupported video operation");
            status::NO_CONTENT
        }
    }
}

#[async_trait]
impl EntryProcessor for MediaEntryProcessor {
    async fn process(&self, entry: &MediaEntry, message_id: &str) -> ProcessorResult<i32> {
        Ok(match entry.entry_type {
            EntryKind::Image => self.process_image(entry, message_id).await,
            EntryKind::Video => self.process_video(entry, message_id).await,
            EntryKind::Unknown => {
                error!(message_id, "unsupported entry type, entry is unprocessable");
                status::NO_CONTENT
            }
        })
    }
}
