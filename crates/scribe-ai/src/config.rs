//! Generation configuration.

use std::time::Duration;

use scribe_local_ai::{DEFAULT_MODEL_NAME, LISTING_TIMEOUT, REQUEST_TIMEOUT, STREAM_IDLE_TIMEOUT};

/// Configuration for [`crate::GenerationClient`].
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Model used when the caller has no preference, and the fallback
    /// entry of the model list
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate
    pub num_predict: u32,
    /// Cadence of elapsed-time updates
    pub tick_interval: Duration,
    /// Longest silence between streamed lines
    pub stream_idle_timeout: Duration,
    /// Total budget for one chat request
    pub request_timeout: Duration,
    /// Budget for model listing and connection checks
    pub listing_timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL_NAME.to_string(),
            temperature: 0.3,
            num_predict: 1024,
            tick_interval: Duration::from_millis(100),
            stream_idle_timeout: STREAM_IDLE_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            listing_timeout: LISTING_TIMEOUT,
        }
    }
}

impl GenerationConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let model = std::env::var("SCRIBE_MODEL").unwrap_or(defaults.model);

        let temperature = std::env::var("SCRIBE_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.temperature);

        let num_predict = std::env::var("SCRIBE_NUM_PREDICT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.num_predict);

        Self {
            model,
            temperature,
            num_predict,
            ..Self::default()
        }
    }

    /// Create a builder for configuration.
    pub fn builder() -> GenerationConfigBuilder {
        GenerationConfigBuilder::default()
    }
}

/// Builder for generation configuration.
#[derive(Debug, Default)]
pub struct GenerationConfigBuilder {
    config: GenerationConfig,
}

impl GenerationConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    pub fn num_predict(mut self, tokens: u32) -> Self {
        self.config.num_predict = tokens;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.stream_idle_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn listing_timeout(mut self, timeout: Duration) -> Self {
        self.config.listing_timeout = timeout;
        self
    }

    pub fn build(self) -> GenerationConfig {
        self.config
    }
}
