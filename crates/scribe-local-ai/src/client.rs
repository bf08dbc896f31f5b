//! HTTP client for the embedded Ollama API.

use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::LocalAIError;
use crate::model::TagsResponse;
use crate::stream::{ByteStream, LineReader};
use crate::DEFAULT_PORT;

/// Longest silence tolerated between streamed lines.
///
/// A cold start loads the whole model before the first byte, so this is
/// generous.
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Total budget for one streaming request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Budget for a plain `/api/tags` listing.
pub const LISTING_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for communicating with Ollama.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    idle_timeout: Duration,
    request_timeout: Duration,
}

impl OllamaClient {
    /// Create a new client with default URL (127.0.0.1:11435).
    pub fn new() -> Self {
        Self::with_port(DEFAULT_PORT)
    }

    /// Create a new client with a custom URL.
    pub fn with_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            idle_timeout: STREAM_IDLE_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Create a new client with a custom port on localhost.
    pub fn with_port(port: u16) -> Self {
        Self::with_url(format!("http://127.0.0.1:{}", port))
    }

    /// Override the streaming budgets.
    pub fn with_timeouts(mut self, idle: Duration, request: Duration) -> Self {
        self.idle_timeout = idle;
        self.request_timeout = request;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Liveness probe: true only when `/api/tags` answers 200 in time.
    pub async fn probe(&self, timeout: Duration) -> bool {
        match self
            .client
            .get(self.url("/api/tags"))
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!("Probe of {} failed: {}", self.base_url, e);
                false
            }
        }
    }

    /// Names of installed models.
    pub async fn list_models(&self, timeout: Duration) -> Result<Vec<String>, LocalAIError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(timeout)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(LocalAIError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let tags: TagsResponse = serde_json::from_str(&body)?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// POST `body` as JSON and stream the response back line by line.
    ///
    /// Anything but 200 is an error. Dropping the returned reader closes the
    /// connection.
    pub async fn post_ndjson<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<LineReader<ByteStream>, LocalAIError> {
        let response = self
            .client
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(LocalAIError::Status(response.status().as_u16()));
        }

        let bytes: ByteStream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(LocalAIError::from))
            .boxed();

        Ok(LineReader::new(bytes).with_idle_timeout(self.idle_timeout))
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}
