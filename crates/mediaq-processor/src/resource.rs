//! Source/target URI resolution.
//!
//! Entries carry free-form URI strings; processing resolves them into one of
//! the supported resource schemes up front so that a malformed or unsupported
//! URI fails as unprocessable before any resizer call is made.

use std::fmt;

use url::Url;

/// A resolved media resource handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaResource {
    /// Local filesystem path (`file://`)
    File(String),
    /// Cloud storage object (`gs://bucket/object`)
    Gcs { bucket: String, object: String },
}

impl MediaResource {
    /// Canonical URI form, as sent to the resizer services.
    pub fn as_uri(&self) -> String {
        match self {
            MediaResource::File(path) => format!("file://{path}"),
            MediaResource::Gcs { bucket, object } => format!("gs://{bucket}/{object}"),
        }
    }
}

impl fmt::Display for MediaResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_uri())
    }
}

fn resolve(role: &str, uri: Option<&str>, message_id: &str) -> Result<MediaResource, String> {
    let Some(raw) = uri else {
        return Err(format!(
            "missing or invalid {role} uri = <none> [messageId = {message_id}]"
        ));
    };
    // Bare absolute paths are treated as local files.
    let raw = if raw.starts_with('/') {
        format!("file://{raw}")
    } else {
        raw.to_string()
    };
    let Ok(parsed) = Url::parse(&raw) else {
        return Err(format!(
            "missing or invalid {role} uri = {raw} [messageId = {message_id}]"
        ));
    };
    match parsed.scheme() {
        "file" => Ok(MediaResource::File(parsed.path().to_string())),
        "gs" => {
            let bucket = parsed.host_str().unwrap_or_default().to_string();
            let object = parsed.path().trim_matches('/').to_string();
            if bucket.is_empty() || object.is_empty() {
                return Err(format!(
                    "missing or invalid {role} uri = {raw} [messageId = {message_id}]"
                ));
            }
            Ok(MediaResource::Gcs { bucket, object })
        }
        _ => Err(format!(
            "unsupported {role} uri = {raw} [messageId = {message_id}]"
        )),
    }
}

/// Resolve an entry's source URI into a readable resource handle.
pub fn resolve_source(source: Option<&str>, message_id: &str) -> Result<MediaResource, String> {
    resolve("source", source, message_id)
}

/// Resolve an entry's target URI into a writable resource handle.
pub fn resolve_target(target: Option<&str>, message_id: &str) -> Result<MediaResource, String> {
    resolve("target", target, message_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_absolute_path_coerces_to_file() {
        let resource = resolve_source(Some("/data/in/a.png"), "m1").expect("resolve");
        assert_eq!(resource, MediaResource::File("/data/in/a.png".to_string()));
        assert_eq!(resource.as_uri(), "file:///data/in/a.png");
    }

    #[test]
    fn file_uri_resolves() {
        let resource = resolve_source(Some("file:///data/in/a.png"), "m1").expect("resolve");
        assert_eq!(resource, MediaResource::File("/data/in/a.png".to_string()));
    }

    #[test]
    fn gs_uri_resolves_to_bucket_and_object() {
        let resource = resolve_target(Some("gs://media-bucket/out/b.jpg"), "m1").expect("resolve");
        assert_eq!(
            resource,
            MediaResource::Gcs {
                bucket: "media-bucket".to_string(),
                object: "out/b.jpg".to_string(),
            }
        );
        assert_eq!(resource.as_uri(), "gs://media-bucket/out/b.jpg");
    }

    #[test]
    fn missing_uri_is_rejected() {
        let err = resolve_source(None, "m1").expect_err("missing uri");
        assert!(err.contains("missing or invalid source uri"));
        assert!(err.contains("m1"));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let err = resolve_target(Some("ftp://host/file"), "m2").expect_err("unsupported scheme");
        assert!(err.contains("unsupported target uri"));
    }

    #[test]
    fn gs_uri_without_object_is_rejected() {
        let err = resolve_source(Some("gs://bucket-only"), "m3").expect_err("no object");
        assert!(err.contains("missing or invalid source uri"));
    }

    #[test]
    fn garbage_uri_is_rejected() {
        let err = resolve_source(Some("not a uri"), "m4").expect_err("garbage");
        assert!(err.contains("missing or invalid source uri"));
    }
}
