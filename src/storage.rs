//! Artifact store capability: blob upload with authenticated download URLs.
//!
//! The pipeline talks to the store through the `ArtifactStore` trait so the
//! upload worker can be exercised against a mock in tests; `CloudinaryStore`
//! is the production adapter.

use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::error::{AppError, Result};

/// Options for one artifact upload. Resource type is always raw and delivery
/// is always authenticated: receipts are not public assets.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub folder: String,
    pub public_id: String,
    pub tags: Vec<String>,
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadedArtifact {
    pub public_id: String,
    pub url: String,
    pub secure_url: String,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload a local file as an authenticated raw resource.
    async fn upload(&self, local_path: &Path, options: &UploadOptions) -> Result<UploadedArtifact>;

    /// Produce a time-limited download URL for an uploaded artifact.
    async fn signed_url(&self, public_id: &str, expires_at: i64) -> Result<String>;

    /// Delete an uploaded artifact. Returns false when it did not exist.
    async fn delete(&self, public_id: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Cloudinary adapter. Requests are authenticated with Cloudinary's signed
/// parameter scheme: SHA-1 over the sorted parameter string plus the API
/// secret.
#[derive(Clone)]
pub struct CloudinaryStore {
    config: CloudinaryConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct CloudinaryUploadResponse {
    public_id: String,
    url: String,
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct CloudinaryDestroyResponse {
    result: String,
}

impl CloudinaryStore {
    pub fn new(config: CloudinaryConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn api_base(&self) -> String {
        format!(
            "https://api.cloudinary.com/v1_1/{}/raw",
            self.config.cloud_name
        )
    }

    /// Sign request parameters: sha1 of `key=value` pairs sorted by key,
    /// joined with `&`, with the API secret appended.
    fn sign_params(&self, params: &[(&str, &str)]) -> String {
        let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let to_sign: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let mut hasher = Sha1::new();
        hasher.update(to_sign.join("&").as_bytes());
        hasher.update(self.config.api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl ArtifactStore for CloudinaryStore {
    async fn upload(&self, local_path: &Path, options: &UploadOptions) -> Result<UploadedArtifact> {
        let bytes = tokio::fs::read(local_path).await?;
        let file_data = format!("data:application/pdf;base64,{}", BASE64.encode(&bytes));
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let tags = options.tags.join(",");

        let signature = self.sign_params(&[
            ("folder", &options.folder),
            ("public_id", &options.public_id),
            ("tags", &tags),
            ("timestamp", &timestamp),
            ("type", "authenticated"),
        ]);

        let form = [
            ("file", file_data.as_str()),
            ("api_key", &self.config.api_key),
            ("timestamp", &timestamp),
            ("signature", &signature),
            ("folder", &options.folder),
            ("public_id", &options.public_id),
            ("tags", &tags),
            ("type", "authenticated"),
        ];

        let response = self
            .client
            .post(format!("{}/upload", self.api_base()))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Cloudinary upload failed ({}): {}",
                status, body
            )));
        }

        let uploaded: CloudinaryUploadResponse = response.json().await?;
        Ok(UploadedArtifact {
            public_id: uploaded.public_id,
            url: uploaded.url,
            secure_url: uploaded.secure_url,
        })
    }

    async fn signed_url(&self, public_id: &str, expires_at: i64) -> Result<String> {
        let expires = expires_at.to_string();
        let signature = self.sign_params(&[
            ("expires_at", &expires),
            ("public_id", public_id),
        ]);
        Ok(format!(
            "{}/download?api_key={}&public_id={}&expires_at={}&signature={}",
            self.api_base(),
            self.config.api_key,
            public_id,
            expires,
            signature
        ))
    }

    async fn delete(&self, public_id: &str) -> Result<bool> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.sign_params(&[
            ("public_id", public_id),
            ("timestamp", &timestamp),
        ]);

        let form = [
            ("public_id", public_id),
            ("api_key", &self.config.api_key),
            ("timestamp", &timestamp),
            ("signature", &signature),
        ];

        let response = self
            .client
            .post(format!("{}/destroy", self.api_base()))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Cloudinary destroy failed ({}): {}",
                status, body
            )));
        }

        let destroyed: CloudinaryDestroyResponse = response.json().await?;
        Ok(destroyed.result == "ok")
    }
}
