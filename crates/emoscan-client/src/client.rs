//! HTTP client for the inference service.
//!
//! One request per call, no retries. Input is checked before any network
//! I/O so a bad path never costs a round trip.

use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use tracing::{debug, info, warn};

use emoscan_core::config::ServerConfig;
use emoscan_core::error::{EmoscanError, Result};
use emoscan_core::prediction::PredictionResponse;
use emoscan_core::types::{EpochMillis, MediaKind};

use crate::service::{HealthStatus, ModelInfo};

/// A file to analyse.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub description: String,
    pub media_kind: MediaKind,
}

impl UploadRequest {
    /// Request for `path` with the media kind inferred from its extension.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let media_kind = MediaKind::from_path(&path);
        Self {
            path,
            description: String::new(),
            media_kind,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_media_kind(mut self, media_kind: MediaKind) -> Self {
        self.media_kind = media_kind;
        self
    }

    /// File name sent with the multipart part.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string())
    }
}

/// Client for `POST /predict` and the auxiliary probes.
#[derive(Clone, Debug)]
pub struct InferenceClient {
    base_url: String,
    http: reqwest::Client,
}

impl InferenceClient {
    /// Build a client with the configured timeouts.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EmoscanError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Upload a file and return the raw response body.
    ///
    /// Non-2xx responses become [`EmoscanError::Server`]; transport failures
    /// become [`EmoscanError::Network`].
    pub async fn upload(&self, request: &UploadRequest) -> Result<String> {
        validate(request).await?;

        let bytes = tokio::fs::read(&request.path).await?;
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(request.file_name())
            .mime_str(request.media_kind.mime_type())
            .map_err(|e| EmoscanError::InvalidInput(format!("Bad content type: {}", e)))?;

        let form = Form::new()
            .part("file", part)
            .text("description", request.description.clone())
            .text("media_type", request.media_kind.as_str())
            .text("upload_time", EpochMillis::now().0.to_string());

        let url = self.endpoint("/predict");
        info!(
            url = %url,
            file = %request.path.display(),
            kind = %request.media_kind,
            size,
            "Uploading for analysis"
        );

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;

        read_body(response).await
    }

    /// Upload a file and decode the prediction.
    pub async fn predict(&self, request: &UploadRequest) -> Result<PredictionResponse> {
        let body = self.upload(request).await?;
        PredictionResponse::from_json(&body)
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<HealthStatus> {
        let body = self.get("/health").await?;
        serde_json::from_str(&body).map_err(|e| EmoscanError::Decode(e.to_string()))
    }

    /// `GET /model-info`.
    pub async fn model_info(&self) -> Result<ModelInfo> {
        let body = self.get("/model-info").await?;
        serde_json::from_str(&body).map_err(|e| EmoscanError::Decode(e.to_string()))
    }

    async fn get(&self, path: &str) -> Result<String> {
        let url = self.endpoint(path);
        debug!(url = %url, "GET");
        let response = self.http.get(&url).send().await.map_err(network_error)?;
        read_body(response).await
    }
}

async fn validate(request: &UploadRequest) -> Result<()> {
    if request.path.as_os_str().is_empty() {
        return Err(EmoscanError::InvalidInput("No file selected".to_string()));
    }
    if !request.media_kind.is_uploadable() {
        return Err(EmoscanError::InvalidInput(format!(
            "Unsupported media type '{}' for {}",
            request.media_kind,
            request.path.display()
        )));
    }
    let metadata = tokio::fs::metadata(&request.path)
        .await
        .map_err(|_| not_found(&request.path))?;
    if !metadata.is_file() {
        return Err(EmoscanError::InvalidInput(format!(
            "Not a regular file: {}",
            request.path.display()
        )));
    }
    Ok(())
}

fn not_found(path: &Path) -> EmoscanError {
    EmoscanError::InvalidInput(format!("File not found: {}", path.display()))
}

fn network_error(e: reqwest::Error) -> EmoscanError {
    warn!(error = %e, "Request failed");
    EmoscanError::Network(e.to_string())
}

async fn read_body(response: Response) -> Result<String> {
    let status: StatusCode = response.status();
    let body = response.text().await.map_err(network_error)?;

    if !status.is_success() {
        warn!(status = status.as_u16(), "Service returned an error");
        return Err(EmoscanError::Server {
            status: status.as_u16(),
            body,
        });
    }

    debug!(status = status.as_u16(), bytes = body.len(), "Response received");
    Ok(body)
}
