//! Embedded Ollama runtime for Scribe.
//!
//! This crate owns the locally-spawned `ollama serve` process that Scribe
//! talks to, and the line-oriented HTTP client used for its streaming
//! endpoints.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │   LineReader    │ <-- │   OllamaClient   │ <-- │ OllamaSupervisor│
//! │ (NDJSON framing)│     │ (/api/tags, pull,│     │ (process, model │
//! │                 │     │  chat streaming) │     │  state, pull)   │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//! ```
//!
//! The supervisor publishes a [`ProcessState`] snapshot through a
//! `tokio::sync::watch` channel so any number of observers can follow the
//! server lifecycle and model download without sharing mutable state.

mod client;
mod config;
mod error;
mod model;
pub mod paths;
mod server;
mod status;
mod stream;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{OllamaClient, LISTING_TIMEOUT, REQUEST_TIMEOUT, STREAM_IDLE_TIMEOUT};
pub use config::{SupervisorConfig, SupervisorConfigBuilder};
pub use error::LocalAIError;
pub use model::{has_model_with_prefix, PullProgress};
pub use server::OllamaSupervisor;
pub use status::{ModelStatus, ProcessState, ServerStatus};
pub use stream::{parse_line, ByteStream, LineReader};

/// Dedicated port for the embedded Ollama instance.
///
/// Deliberately not 11434 so a system-wide Ollama can keep running.
pub const DEFAULT_PORT: u16 = 11435;

/// Model the clinical note generator is tuned for.
pub const DEFAULT_MODEL_NAME: &str = "gpt-oss:20b";

/// Any installed model whose name starts with this counts as present.
pub const REQUIRED_MODEL_PREFIX: &str = "gpt-oss";
