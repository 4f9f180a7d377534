//! Shared HTTP client for the Skiff API.
//!
//! Provides a minimal client with configurable auth (Bearer token or
//! X-Api-Key), generic request helpers, and the chunked-upload orchestrator
//! in the `upload` module.

pub mod upload;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Authentication strategy for the API.
#[derive(Clone, Debug)]
pub enum Auth {
    /// `Authorization: Bearer {token}`
    Bearer(String),
    /// `X-Api-Key: {key}`
    ApiKey(String),
}

/// API version prefix. Set SKIFF_API_VERSION to match the server.
pub fn api_prefix() -> String {
    let version = std::env::var("SKIFF_API_VERSION").unwrap_or_else(|_| "v1".to_string());
    format!("/api/{}", version)
}

/// HTTP client for the Skiff API with configurable auth.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    auth: Auth,
}

impl ApiClient {
    pub fn new(base_url: String, auth: Auth) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    /// Create a client from SKIFF_API_URL and SKIFF_API_KEY.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("SKIFF_API_URL")
            .or_else(|_| std::env::var("API_URL"))
            .unwrap_or_else(|_| "http://localhost:4000".to_string());

        let api_key = std::env::var("SKIFF_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .context("Missing API key. Set SKIFF_API_KEY or API_KEY")?;

        Self::new(base_url, Auth::ApiKey(api_key))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Auth::Bearer(token) => request.header("Authorization", format!("Bearer {}", token)),
            Auth::ApiKey(key) => request.header("X-Api-Key", key.as_str()),
        }
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "API request failed with status {}: {}",
                status,
                error_text
            ));
        }
        Ok(response)
    }

    /// GET request with optional query parameters. Deserializes JSON response.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.build_url(path);
        let mut request = self.apply_auth(self.client.get(&url));
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await.context("Failed to send request")?;
        let response = Self::expect_success(response).await?;

        response.json().await.context("Failed to parse response as JSON")
    }

    /// POST JSON body and deserialize response.
    pub async fn post_json<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.build_url(path);
        let request = self.apply_auth(self.client.post(&url).json(body));

        let response = request.send().await.context("Failed to send request")?;
        let response = Self::expect_success(response).await?;

        response.json().await.context("Failed to parse response as JSON")
    }

    /// POST multipart form and deserialize response.
    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T> {
        let url = self.build_url(path);
        let request = self.apply_auth(self.client.post(&url).multipart(form));

        let response = request.send().await.context("Failed to send request")?;
        let response = Self::expect_success(response).await?;

        response.json().await.context("Failed to parse response as JSON")
    }

    /// PUT a raw body and deserialize the JSON response.
    pub async fn put_body<T: DeserializeOwned>(
        &self,
        path: &str,
        body: reqwest::Body,
    ) -> Result<T> {
        let url = self.build_url(path);
        let request = self.apply_auth(
            self.client
                .put(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(body),
        );

        let response = request.send().await.context("Failed to send request")?;
        let response = Self::expect_success(response).await?;

        response.json().await.context("Failed to parse response as JSON")
    }

    /// DELETE request. Returns Ok(()) on success.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = self.build_url(path);
        let request = self.apply_auth(self.client.delete(&url));

        let response = request.send().await.context("Failed to send request")?;
        Self::expect_success(response).await?;

        Ok(())
    }

    /// Raw client for custom requests.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

// Re-export the orchestrator and shared response types for convenience.
pub use skiff_core::models::{
    CompletePart, CompleteUploadRequest, FileResponse, StartUploadRequest, StartUploadResponse,
    UploadProgressResponse, UploadedFileResponse, Visibility,
};
pub use upload::{ChunkedUploader, PauseHandle, Progress, UploadOptions, UploaderConfig};
