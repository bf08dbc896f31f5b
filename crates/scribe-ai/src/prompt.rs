//! Prompt construction for clinical note generation.

use serde::Serialize;

use crate::config::GenerationConfig;

/// System prompt describing the note structure.
pub const SYSTEM_PROMPT: &str = r#"You are a medical scribe assistant. Your task is to convert a doctor-patient conversation into a structured clinical note.

The clinical note should include the following sections:

**CHIEF COMPLAINT**
The main reason for the visit in 1-2 sentences.

**HISTORY OF PRESENT ILLNESS**
Detailed description of the current problem including onset, duration, severity, and associated symptoms.

**REVIEW OF SYSTEMS**
Relevant symptoms mentioned, organized by body system.

**PHYSICAL EXAMINATION**
Any examination findings discussed during the conversation.

**ASSESSMENT AND PLAN**
Diagnosis or differential diagnoses, and the treatment plan discussed.

Generate a professional, concise clinical note based on the conversation. Use medical terminology appropriately."#;

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: ChatOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

/// User turn: the conversation verbatim plus the generation directive.
pub fn user_message(conversation: &str) -> String {
    format!(
        "Doctor-Patient Conversation:\n\n{}\n\nGenerate the clinical note:",
        conversation
    )
}

/// Build the streaming chat request for one conversation.
pub fn build_chat_request(
    model: &str,
    conversation: &str,
    config: &GenerationConfig,
) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user_message(conversation),
            },
        ],
        stream: true,
        options: ChatOptions {
            temperature: config.temperature,
            num_predict: config.num_predict,
        },
    }
}
