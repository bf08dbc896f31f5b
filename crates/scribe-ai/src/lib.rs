//! # Scribe note generation
//!
//! Turns a doctor-patient conversation into a structured clinical note by
//! streaming a chat completion from the embedded Ollama server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌───────────────────┐
//! │ Conversation │ --> │ GenerationClient │ --> │ GenerationSession │
//! │     text     │     │   (/api/chat)    │     │  (watch channel)  │
//! └──────────────┘     └──────────────────┘     └───────────────────┘
//!                               │
//!                        ┌──────┴───────┐
//!                        │ OllamaClient │  (scribe-local-ai)
//!                        └──────────────┘
//! ```
//!
//! Each streamed line is parsed on its own and folded into the session. The
//! phase is inferred from which fields a line carries: a prompt evaluation
//! count means the prompt is being processed, the first content fragment
//! means tokens are flowing, `done` ends the session.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use scribe_ai::{GenerationClient, GenerationConfig};
//!
//! let client = Arc::new(GenerationClient::from_supervisor(&supervisor, GenerationConfig::default()));
//! let handle = client.start(&conversation, "gpt-oss:20b");
//! let session = handle.join().await;
//! println!("{}", session.text);
//! ```

mod config;
mod generation;
mod prompt;
mod session;

pub use config::{GenerationConfig, GenerationConfigBuilder};
pub use generation::{ConnectionState, GenerationClient, GenerationHandle};
pub use prompt::{build_chat_request, user_message, ChatMessage, ChatOptions, ChatRequest, SYSTEM_PROMPT};
pub use session::{ChatChunk, ChunkMessage, GenerationPhase, GenerationSession};

// Re-export the supervisor side for the composition root.
pub use scribe_local_ai::{
    paths as local_ai_paths, LocalAIError, ModelStatus, OllamaClient, OllamaSupervisor,
    ProcessState, ServerStatus, SupervisorConfig, DEFAULT_MODEL_NAME, DEFAULT_PORT,
};
