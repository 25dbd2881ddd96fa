//! Asset uploads for photo and file answers.
//!
//! Backends forward the bytes to a managed object store and hand back that
//! service's description of the stored object, which always carries a public
//! `secure_url` (and `url`).

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_FOLDER: &str = "gensheet";

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
    pub folder: String,
}

impl UploadRequest {
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("storage request failed: {0}")]
    Request(String),
    #[error("storage service rejected the upload: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait AssetStorage: Send + Sync + 'static {
    fn backend(&self) -> &'static str;

    async fn upload(&self, request: UploadRequest) -> Result<Value, UploadError>;
}

/// The public URL inside an upload result.
pub fn uploaded_url(result: &Value) -> Option<&str> {
    result
        .get("secure_url")
        .or_else(|| result.get("url"))
        .and_then(Value::as_str)
}

/// Letters, digits, `-`, `_` and `/`-separated segments, no `..`.
pub fn is_valid_folder(folder: &str) -> bool {
    !folder.is_empty()
        && folder.len() <= 128
        && folder.split('/').all(|segment| {
            !segment.is_empty()
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

/// Keeps a filename safe to embed in an object key.
fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

pub struct S3AssetStorage {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3AssetStorage {
    pub fn new(client: S3Client, bucket: impl Into<String>, public_base_url: &str) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Permanent URL of `key` under the bucket's public base.
    fn public_url(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base_url)
    }
}

#[async_trait]
impl AssetStorage for S3AssetStorage {
    fn backend(&self) -> &'static str {
        "s3"
    }

    async fn upload(&self, request: UploadRequest) -> Result<Value, UploadError> {
        let filename = sanitize_filename(&request.filename);
        let public_id = format!("{}/{}-{}", request.folder, Uuid::new_v4(), filename);
        let size = request.bytes.len();
        let resource_type = if request.is_image() { "image" } else { "raw" };
        let format = filename
            .rsplit_once('.')
            .map(|(_, extension)| extension.to_ascii_lowercase())
            .unwrap_or_default();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&public_id)
            .content_type(&request.content_type)
            .body(ByteStream::from(request.bytes))
            .send()
            .await
            .map_err(|err| UploadError::Request(err.to_string()))?;

        let url = self.public_url(&public_id);
        info!(key = %public_id, bytes = size, "stored asset in S3");

        Ok(json!({
            "public_id": public_id,
            "url": url,
            "secure_url": url,
            "bytes": size,
            "format": format,
            "resource_type": resource_type,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_secure_url() {
        let result = json!({"url": "http://a/x.jpg", "secure_url": "https://a/x.jpg"});
        assert_eq!(uploaded_url(&result), Some("https://a/x.jpg"));
        assert_eq!(uploaded_url(&json!({"url": "http://a/x.jpg"})), Some("http://a/x.jpg"));
        assert_eq!(uploaded_url(&json!({})), None);
    }

    #[test]
    fn validates_folders() {
        assert!(is_valid_folder("gensheet"));
        assert!(is_valid_folder("gensheet/inspections_2026"));
        assert!(!is_valid_folder(""));
        assert!(!is_valid_folder("../secrets"));
        assert!(!is_valid_folder("gensheet//x"));
        assert!(!is_valid_folder("with space"));
    }

    #[test]
    fn sanitizes_filenames() {
        assert_eq!(sanitize_filename("C:\\photos\\leak 1.jpg"), "leak_1.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(".."), "upload");
    }
}
