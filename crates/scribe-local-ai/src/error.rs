//! Error types for local AI operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to or supervising Ollama.
///
/// These never cross the public supervisor or generation boundaries as
/// `Err`; they are folded into `Failed(reason)` states there.
#[derive(Debug, Error)]
pub enum LocalAIError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with something other than 200 OK.
    #[error("server responded with HTTP {0}")]
    Status(u16),

    /// Server reported an error inside a successful response.
    #[error("{0}")]
    Api(String),

    /// No data arrived on a streaming response for too long.
    #[error("no data received for {}s", .0.as_secs())]
    StreamIdle(Duration),

    /// Server failed to start.
    #[error("Failed to start Ollama: {0}")]
    ServerStartFailed(String),

    /// Server process exited while we were waiting for it.
    #[error("Ollama server exited during startup: {0}")]
    ServerDied(String),

    /// ollama binary not found.
    #[error("Ollama binary not found at {0}")]
    ServerBinaryNotFound(String),

    /// Failed to create the application data directory.
    #[error("Failed to create data directory: {0}")]
    DataDirCreationFailed(String),

    /// Liveness probe never succeeded within the attempt budget.
    #[error("Ollama server failed to start: {0}")]
    ServerStartTimeout(String),
}
