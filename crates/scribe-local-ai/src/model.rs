//! Model listing and pull progress.

use serde::{Deserialize, Serialize};

/// Response body of `GET /api/tags`.
#[derive(Debug, Deserialize)]
pub(crate) struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TagModel {
    pub name: String,
}

/// Body of `POST /api/pull`.
#[derive(Debug, Serialize)]
pub(crate) struct PullRequest<'a> {
    pub name: &'a str,
    pub stream: bool,
}

/// One line of the `/api/pull` stream. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub completed: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Whether any installed model name starts with `prefix`.
pub fn has_model_with_prefix<S: AsRef<str>>(names: &[S], prefix: &str) -> bool {
    names.iter().any(|name| name.as_ref().starts_with(prefix))
}

/// Folds pull lines into a download fraction.
///
/// `total` and `completed` persist across lines, since Ollama often sends
/// them separately. The reported fraction never moves backwards within one
/// attempt.
#[derive(Debug, Default)]
pub(crate) struct PullTracker {
    total: i64,
    completed: i64,
    progress: f64,
}

impl PullTracker {
    /// Record one line, returning the status message it implies, if any.
    pub fn observe(&mut self, line: &PullProgress) -> Option<String> {
        let mut message = line.status.clone();

        if let Some(total) = line.total {
            self.total = total;
        }
        if let Some(completed) = line.completed {
            self.completed = completed;
        }

        if self.total > 0 && (line.total.is_some() || line.completed.is_some()) {
            let fraction = (self.completed as f64 / self.total as f64).clamp(0.0, 1.0);
            self.progress = self.progress.max(fraction);
            message = Some(format!(
                "Downloading... {}%",
                (self.progress * 100.0) as u32
            ));
        }

        message
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }
}
