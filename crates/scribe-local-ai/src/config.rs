//! Supervisor configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::paths;
use crate::{DEFAULT_MODEL_NAME, DEFAULT_PORT, REQUIRED_MODEL_PREFIX};

/// Configuration for [`crate::OllamaSupervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Path to the ollama executable
    pub binary: PathBuf,
    /// Dedicated loopback port
    pub port: u16,
    /// Application data directory (holds `models/`)
    pub data_dir: PathBuf,
    /// Model pulled during setup
    pub required_model: String,
    /// Installed models starting with this count as present
    pub model_prefix: String,
    /// Delay between liveness probes while starting
    pub poll_interval: Duration,
    /// Liveness probes before giving up
    pub max_attempts: u32,
    /// Per-probe timeout, shorter than `poll_interval`
    pub probe_timeout: Duration,
    /// Characters of child stderr kept in a failure reason
    pub diagnostic_limit: usize,
    /// Time the child gets to exit after SIGTERM
    pub stop_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let data_dir = paths::default_data_dir();
        Self {
            binary: paths::ollama_binary_path(&data_dir),
            port: DEFAULT_PORT,
            data_dir,
            required_model: DEFAULT_MODEL_NAME.to_string(),
            model_prefix: REQUIRED_MODEL_PREFIX.to_string(),
            poll_interval: Duration::from_millis(500),
            max_attempts: 30,
            probe_timeout: Duration::from_millis(300),
            diagnostic_limit: 200,
            stop_grace: Duration::from_millis(500),
        }
    }
}

impl SupervisorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = std::env::var("SCRIBE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let binary = std::env::var("SCRIBE_OLLAMA_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|_| paths::ollama_binary_path(&data_dir));

        let port = std::env::var("SCRIBE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let required_model =
            std::env::var("SCRIBE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL_NAME.to_string());

        Self {
            binary,
            port,
            data_dir,
            required_model,
            ..Self::default()
        }
    }

    /// Loopback URL of the dedicated port.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn models_dir(&self) -> PathBuf {
        paths::models_dir(&self.data_dir)
    }

    /// Create a builder for configuration.
    pub fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder::default()
    }
}

/// Builder for supervisor configuration.
#[derive(Debug, Default)]
pub struct SupervisorConfigBuilder {
    config: SupervisorConfig,
}

impl SupervisorConfigBuilder {
    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.binary = path.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Also moves the default binary location unless one was set explicitly.
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        let old_default = paths::ollama_binary_path(&self.config.data_dir);
        self.config.data_dir = path.into();
        if self.config.binary == old_default {
            self.config.binary = paths::ollama_binary_path(&self.config.data_dir);
        }
        self
    }

    pub fn required_model(mut self, model: impl Into<String>) -> Self {
        self.config.required_model = model.into();
        self
    }

    pub fn model_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.model_prefix = prefix.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    pub fn diagnostic_limit(mut self, chars: usize) -> Self {
        self.config.diagnostic_limit = chars;
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.config.stop_grace = grace;
        self
    }

    pub fn build(self) -> SupervisorConfig {
        self.config
    }
}
