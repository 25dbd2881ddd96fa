use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::config::CloudinaryConfig;
use crate::storage::{AssetStorage, UploadError, UploadRequest};

pub const DEFAULT_API_BASE: &str = "https://api.cloudinary.com";

/// Bounds images to 1920x1080 and lets the service pick the compression.
pub const IMAGE_TRANSFORMATION: &str = "c_limit,h_1080,w_1920/q_auto:good";

/// Signed uploads to Cloudinary's upload API.
pub struct CloudinaryStorage {
    client: Client,
    api_base: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

impl CloudinaryStorage {
    pub fn new(config: &CloudinaryConfig) -> anyhow::Result<Self> {
        Self::with_api_base(config, DEFAULT_API_BASE)
    }

    pub fn with_api_base(config: &CloudinaryConfig, api_base: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build Cloudinary HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            cloud_name: config.cloud_name.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1_1/{}/auto/upload", self.api_base, self.cloud_name)
    }

    fn signed_params(&self, request: &UploadRequest, timestamp: i64) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        params.insert("folder", request.folder.clone());
        params.insert("timestamp", timestamp.to_string());
        if request.is_image() {
            params.insert("transformation", IMAGE_TRANSFORMATION.to_string());
        }
        params
    }
}

/// SHA-256 request signature: `k=v` pairs sorted by key, joined with `&`,
/// followed by the API secret.
pub fn sign(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl AssetStorage for CloudinaryStorage {
    fn backend(&self) -> &'static str {
        "cloudinary"
    }

    async fn upload(&self, request: UploadRequest) -> Result<Value, UploadError> {
        let params = self.signed_params(&request, Utc::now().timestamp());
        let signature = sign(&params, &self.api_secret);
        let size = request.bytes.len();

        let file = Part::bytes(request.bytes)
            .file_name(request.filename.clone())
            .mime_str(&request.content_type)
            .map_err(|err| UploadError::Request(err.to_string()))?;

        let mut form = Form::new()
            .part("file", file)
            .text("api_key", self.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");
        for (key, value) in params {
            form = form.text(key, value);
        }

        let response = self
            .client
            .post(self.endpoint())
            .multipart(form)
            .send()
            .await
            .map_err(|err| {
                error!(error = %err, "Cloudinary request failed");
                UploadError::Request(err.to_string())
            })?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|err| UploadError::Request(format!("unreadable response: {err}")))?;

        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            error!(%status, message = %message, "Cloudinary rejected upload");
            return Err(UploadError::Rejected(message));
        }

        info!(
            folder = %request.folder,
            bytes = size,
            public_id = body.get("public_id").and_then(serde_json::Value::as_str).unwrap_or_default(),
            "stored asset in Cloudinary"
        );
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> CloudinaryConfig {
        CloudinaryConfig {
            cloud_name: "demo".into(),
            api_key: "1234".into(),
            api_secret: "topsecret".into(),
        }
    }

    fn request(content_type: &str, folder: &str) -> UploadRequest {
        UploadRequest {
            bytes: b"fake-bytes".to_vec(),
            filename: "gauge.jpg".into(),
            content_type: content_type.into(),
            folder: folder.into(),
        }
    }

    #[test]
    fn signs_sorted_params_with_secret() {
        let storage = CloudinaryStorage::new(&config()).unwrap();

        let image = storage.signed_params(&request("image/jpeg", "gensheet/inspections"), 1_700_000_000);
        assert_eq!(
            sign(&image, "topsecret"),
            "5ba795cf1fd3b3d2e2a9398f92d1a3b1d0288e033900809ad9bf435add6af199"
        );

        let pdf = storage.signed_params(&request("application/pdf", "gensheet"), 1_700_000_000);
        assert!(!pdf.contains_key("transformation"));
        assert_eq!(
            sign(&pdf, "topsecret"),
            "3770d00d2e4ce5d742cb0dbbca68b38ad496a215b73f89133d7ff8d999de25cd"
        );
    }

    #[tokio::test]
    async fn returns_service_result_verbatim() {
        let server = MockServer::start().await;
        let result = json!({
            "public_id": "gensheet/abc123",
            "secure_url": "https://res.cloudinary.com/demo/image/upload/v1/gensheet/abc123.jpg",
            "url": "http://res.cloudinary.com/demo/image/upload/v1/gensheet/abc123.jpg",
            "bytes": 10,
            "format": "jpg",
            "resource_type": "image"
        });
        Mock::given(method("POST"))
            .and(path("/v1_1/demo/auto/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(result.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let storage = CloudinaryStorage::with_api_base(&config(), &server.uri()).unwrap();
        let uploaded = storage.upload(request("image/jpeg", "gensheet")).await.unwrap();
        assert_eq!(uploaded, result);
    }

    #[tokio::test]
    async fn surfaces_service_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "Invalid Signature"}})),
            )
            .mount(&server)
            .await;

        let storage = CloudinaryStorage::with_api_base(&config(), &server.uri()).unwrap();
        let err = storage.upload(request("image/png", "gensheet")).await.unwrap_err();
        assert!(matches!(err, UploadError::Rejected(message) if message == "Invalid Signature"));
    }
}
