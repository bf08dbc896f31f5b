//! Observable state of the embedded server.

use std::fmt;

/// Lifecycle of the Ollama child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServerStatus {
    #[default]
    NotStarted,
    Starting,
    Running,
    Failed(String),
}

/// Whether the required model is available to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ModelStatus {
    #[default]
    Unknown,
    Checking,
    NotInstalled,
    Downloading,
    Ready,
    Failed(String),
}

/// Snapshot published by [`crate::OllamaSupervisor`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessState {
    pub lifecycle: ServerStatus,
    pub model: ModelStatus,
    /// Fraction in `[0.0, 1.0]`.
    pub download_progress: f64,
    pub status_message: String,
}

impl ProcessState {
    /// Server is up and the required model is installed.
    pub fn is_ready(&self) -> bool {
        self.lifecycle == ServerStatus::Running && self.model == ModelStatus::Ready
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::NotStarted => write!(f, "not started"),
            ServerStatus::Starting => write!(f, "starting"),
            ServerStatus::Running => write!(f, "running"),
            ServerStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelStatus::Unknown => write!(f, "unknown"),
            ModelStatus::Checking => write!(f, "checking"),
            ModelStatus::NotInstalled => write!(f, "not installed"),
            ModelStatus::Downloading => write!(f, "downloading"),
            ModelStatus::Ready => write!(f, "ready"),
            ModelStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}
