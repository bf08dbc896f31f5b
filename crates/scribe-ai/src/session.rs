//! Generation phases and the per-request session state machine.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Coarse progress of one generation request.
///
/// Ordered: `Connecting → LoadingModel → ProcessingPrompt → Generating →
/// Complete`. `Failed` can be entered from any non-terminal phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GenerationPhase {
    #[default]
    Idle,
    Connecting,
    LoadingModel,
    ProcessingPrompt,
    Generating,
    Complete,
    Failed(String),
}

impl GenerationPhase {
    fn rank(&self) -> u8 {
        match self {
            GenerationPhase::Idle => 0,
            GenerationPhase::Connecting => 1,
            GenerationPhase::LoadingModel => 2,
            GenerationPhase::ProcessingPrompt => 3,
            GenerationPhase::Generating => 4,
            GenerationPhase::Complete => 5,
            GenerationPhase::Failed(_) => 6,
        }
    }

    /// `Complete` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationPhase::Complete | GenerationPhase::Failed(_))
    }

    /// A request is between connecting and its terminal phase.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != GenerationPhase::Idle
    }
}

impl fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationPhase::Idle => write!(f, "Ready"),
            GenerationPhase::Connecting => write!(f, "Connecting..."),
            GenerationPhase::LoadingModel => write!(f, "Loading model..."),
            GenerationPhase::ProcessingPrompt => write!(f, "Processing prompt..."),
            GenerationPhase::Generating => write!(f, "Generating"),
            GenerationPhase::Complete => write!(f, "Done"),
            GenerationPhase::Failed(error) => write!(f, "Failed: {}", error),
        }
    }
}

/// One line of the `/api/chat` stream.
///
/// Only the fields the phase heuristics read are declared; everything else
/// the server sends is ignored.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    /// Nanoseconds
    #[serde(default)]
    pub eval_duration: Option<u64>,
    /// Nanoseconds
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Live state of one generation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationSession {
    pub phase: GenerationPhase,
    /// Every content fragment received, in order.
    pub text: String,
    pub tokens_generated: u64,
    pub tokens_per_second: f64,
    pub elapsed: Duration,
    /// Time the server spent loading the model, once reported.
    pub model_load_time: Option<Duration>,
    pub cancelled: bool,
    pub is_generating: bool,
    seen_content: bool,
}

impl GenerationSession {
    /// Fresh session for a request that is about to be sent.
    pub fn begin() -> Self {
        Self {
            phase: GenerationPhase::Connecting,
            is_generating: true,
            ..Self::default()
        }
    }

    /// Move forward to `next`. Backward moves and anything after a terminal
    /// phase are ignored.
    pub(crate) fn advance(&mut self, next: GenerationPhase) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        if matches!(next, GenerationPhase::Failed(_)) || next.rank() > self.phase.rank() {
            self.phase = next;
            true
        } else {
            false
        }
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.advance(GenerationPhase::Failed(reason.into()));
    }

    /// Fold one parsed line into the session.
    ///
    /// Returns `true` when the line ends the stream.
    pub(crate) fn apply(&mut self, chunk: &ChatChunk) -> bool {
        if self.model_load_time.is_none() {
            if let Some(nanos) = chunk.load_duration {
                self.model_load_time = Some(Duration::from_nanos(nanos));
            }
        }

        if chunk.prompt_eval_count.unwrap_or(0) > 0 && !self.seen_content {
            self.advance(GenerationPhase::ProcessingPrompt);
        }

        if let Some(content) = chunk
            .message
            .as_ref()
            .and_then(|m| m.content.as_deref())
            .filter(|c| !c.is_empty())
        {
            if !self.seen_content {
                self.seen_content = true;
                self.advance(GenerationPhase::Generating);
            }
            self.text.push_str(content);
        }

        if let Some(count) = chunk.eval_count {
            self.tokens_generated = count;
            if let Some(nanos) = chunk.eval_duration.filter(|d| *d > 0) {
                self.tokens_per_second = count as f64 / (nanos as f64 / 1_000_000_000.0);
            }
        }

        if let Some(error) = &chunk.error {
            self.fail(error.clone());
        }

        if chunk.done {
            self.advance(GenerationPhase::Complete);
            return true;
        }

        false
    }

    /// Stop point: text is kept, a non-terminal phase returns to `Idle`.
    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
        if !self.phase.is_terminal() {
            self.phase = GenerationPhase::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_local_ai::parse_line;

    fn feed(session: &mut GenerationSession, lines: &[&str]) -> Vec<GenerationPhase> {
        let mut phases = vec![session.phase.clone()];
        for line in lines {
            let Some(chunk) = parse_line::<ChatChunk>(line) else {
                continue;
            };
            let stop = session.apply(&chunk);
            phases.push(session.phase.clone());
            if stop {
                break;
            }
        }
        phases
    }

    fn loading() -> GenerationSession {
        let mut session = GenerationSession::begin();
        session.advance(GenerationPhase::LoadingModel);
        session
    }

    #[test]
    fn test_full_phase_progression() {
        let mut session = loading();
        let phases = feed(
            &mut session,
            &[
                r#"{"message":{"role":"assistant","content":""},"prompt_eval_count":42}"#,
                r#"{"message":{"content":"**CHIEF"}}"#,
                r#"{"message":{"content":" COMPLAINT**"},"prompt_eval_count":42}"#,
                r#"{"message":{"content":""},"done":true,"eval_count":120,"eval_duration":2000000000,"load_duration":1500000000}"#,
            ],
        );

        assert_eq!(
            phases,
            vec![
                GenerationPhase::LoadingModel,
                GenerationPhase::ProcessingPrompt,
                GenerationPhase::Generating,
                GenerationPhase::Generating,
                GenerationPhase::Complete,
            ]
        );
        assert_eq!(session.text, "**CHIEF COMPLAINT**");
        assert_eq!(session.tokens_generated, 120);
        assert_eq!(session.tokens_per_second, 60.0);
        assert_eq!(session.model_load_time, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_phases_never_move_backwards() {
        let mut session = loading();
        let phases = feed(
            &mut session,
            &[
                r#"{"message":{"content":"a"}}"#,
                r#"{"prompt_eval_count":10}"#,
                r#"{"message":{"content":"b"}}"#,
            ],
        );
        assert!(phases.windows(2).all(|w| w[0].rank() <= w[1].rank()));
        assert_eq!(session.phase, GenerationPhase::Generating);
    }

    #[test]
    fn test_text_is_concatenation_of_fragments() {
        let mut session = loading();
        feed(
            &mut session,
            &[
                r#"{"message":{"content":"  lead"},"eval_count":1}"#,
                "not json at all",
                r#"{"message":{"content":"ing "},"unknown":{"nested":true}}"#,
                "",
                r#"{"message":{"content":"\n"}}"#,
                r#"{"message":{"content":"ing "}}"#,
                r#"{"done":true}"#,
                r#"{"message":{"content":"after done"}}"#,
            ],
        );
        assert_eq!(session.text, "  leading \ning ");
    }

    #[test]
    fn test_error_before_done_ends_failed() {
        let mut session = loading();
        feed(
            &mut session,
            &[
                r#"{"message":{"content":"partial"}}"#,
                r#"{"error":"boom"}"#,
                r#"{"message":{"content":" more"}}"#,
                r#"{"done":true}"#,
            ],
        );
        assert_eq!(session.phase, GenerationPhase::Failed("boom".to_string()));
        assert_eq!(session.text, "partial more");
    }

    #[test]
    fn test_token_rate_ignores_zero_duration() {
        let mut session = loading();
        feed(
            &mut session,
            &[
                r#"{"eval_count":10,"eval_duration":500000000}"#,
                r#"{"eval_count":12,"eval_duration":0}"#,
                r#"{"eval_count":14}"#,
            ],
        );
        assert_eq!(session.tokens_generated, 14);
        assert_eq!(session.tokens_per_second, 20.0);
    }

    #[test]
    fn test_cancel_keeps_text() {
        let mut session = loading();
        feed(&mut session, &[r#"{"message":{"content":"kept"}}"#]);
        session.cancel();

        assert!(session.cancelled);
        assert_eq!(session.phase, GenerationPhase::Idle);
        assert_eq!(session.text, "kept");
    }

    #[test]
    fn test_cancel_after_complete_keeps_phase() {
        let mut session = loading();
        feed(&mut session, &[r#"{"done":true}"#]);
        session.cancel();
        assert_eq!(session.phase, GenerationPhase::Complete);
    }

    #[test]
    fn test_phase_descriptions() {
        assert_eq!(GenerationPhase::Idle.to_string(), "Ready");
        assert_eq!(GenerationPhase::Complete.to_string(), "Done");
        assert_eq!(
            GenerationPhase::Failed("request failed".to_string()).to_string(),
            "Failed: request failed"
        );
        assert!(GenerationPhase::Generating.is_active());
        assert!(!GenerationPhase::Idle.is_active());
    }
}
