//! Media queue entry: the immutable descriptor of one resize/transcode job.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of media a queue entry refers to.
///
/// A closed set: adding a new media type means adding a variant here, not
/// scattering string comparisons across call sites. Payloads carrying an
/// unrecognized kind deserialize to [`EntryKind::Unknown`] so that validation
/// happens at processing time, not at the wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Image,
    Video,
    #[default]
    #[serde(other)]
    Unknown,
}

impl EntryKind {
    /// Wire representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Image => "image",
            EntryKind::Video => "video",
            EntryKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work submitted to the media processing queue.
///
/// Entries are created by the producer, serialized onto the wire as flat
/// camelCase JSON with absent optionals omitted (never encoded as nulls), and
/// never mutated after construction. Equality is by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEntry {
    /// Media kind; defaults to `unknown` when absent from the payload.
    #[serde(default)]
    pub entry_type: EntryKind,
    /// Source URI (`file://` or `gs://`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Target URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Resize mode (`inbox`, `exact`, `none`, `thumbnail`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Target width in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_width: Option<i32>,
    /// Target height in pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_height: Option<i32>,
    /// Horizontal crop weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_x: Option<i32>,
    /// Vertical crop weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_y: Option<i32>,
    /// Output format (e.g. `jpeg`, `webp`, `x264`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
}

impl MediaEntry {
    /// Create an entry of the given kind with every optional field absent.
    pub fn new(entry_type: EntryKind) -> Self {
        Self {
            entry_type,
            source: None,
            target: None,
            operation: None,
            target_width: None,
            target_height: None,
            weight_x: None,
            weight_y: None,
            target_type: None,
        }
    }

    /// Create an image entry.
    pub fn image() -> Self {
        Self::new(EntryKind::Image)
    }

    /// Create a video entry.
    pub fn video() -> Self {
        Self::new(EntryKind::Video)
    }

    /// Set the source URI.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the target URI.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set the resize operation.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Set the target dimensions.
    pub fn with_size(mut self, width: Option<i32>, height: Option<i32>) -> Self {
        self.target_width = width;
        self.target_height = height;
        self
    }

    /// Set the crop weights.
    pub fn with_weights(mut self, weight_x: Option<i32>, weight_y: Option<i32>) -> Self {
        self.weight_x = weight_x;
        self.weight_y = weight_y;
        self
    }

    /// Set the output format.
    pub fn with_target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = Some(target_type.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_to_camel_case_without_nulls() {
        let entry = MediaEntry::image()
            .with_source("gs://bucket/in.png")
            .with_size(Some(320), None);

        let json = serde_json::to_string(&entry).expect("serialize entry");
        assert!(json.contains("\"entryType\":\"image\""));
        assert!(json.contains("\"targetWidth\":320"));
        // Absent optionals are omitted entirely, not encoded as null.
        assert!(!json.contains("null"));
        assert!(!json.contains("targetHeight"));
        assert!(!json.contains("weightX"));
    }

    #[test]
    fn entry_round_trip_preserves_absent_fields() {
        let entry = MediaEntry::image().with_source("file:///in/a.png");

        let json = serde_json::to_string(&entry).expect("serialize entry");
        let decoded: MediaEntry = serde_json::from_str(&json).expect("deserialize entry");

        assert_eq!(decoded, entry);
        assert_eq!(decoded.entry_type, EntryKind::Image);
        assert_eq!(decoded.source.as_deref(), Some("file:///in/a.png"));
        assert_eq!(decoded.target, None);
        assert_eq!(decoded.target_width, None);
        assert_eq!(decoded.target_height, None);
        assert_eq!(decoded.weight_x, None);
        assert_eq!(decoded.weight_y, None);
        assert_eq!(decoded.target_type, None);
    }

    #[test]
    fn missing_entry_type_defaults_to_unknown() {
        let decoded: MediaEntry = serde_json::from_str("{}").expect("deserialize empty object");
        assert_eq!(decoded.entry_type, EntryKind::Unknown);
    }

    #[test]
    fn unrecognized_entry_type_maps_to_unknown() {
        let decoded: MediaEntry =
            serde_json::from_str(r#"{"entryType":"audio"}"#).expect("deserialize entry");
        assert_eq!(decoded.entry_type, EntryKind::Unknown);
    }

    #[test]
    fn full_entry_round_trip_is_exact() {
        let entry = MediaEntry::video()
            .with_source("gs://bucket/in.mp4")
            .with_target("gs://bucket/out.mp4")
            .with_operation("inbox")
            .with_size(Some(1280), Some(720))
            .with_weights(Some(1), Some(2))
            .with_target_type("x264");

        let json = serde_json::to_string(&entry).expect("serialize entry");
        let decoded: MediaEntry = serde_json::from_str(&json).expect("deserialize entry");
        assert_eq!(decoded, entry);
    }
}
