//! Engine configuration.
//!
//! All tuning knobs live in one plain struct handed to the session at
//! construction time; nothing here is process-global.

use crate::error::ConfigError;
use std::time::Duration;

/// Default realtime model served over the bidirectional endpoint.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Bidirectional generate-content WebSocket endpoint (v1alpha).
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Configuration for one live session engine instance.
#[derive(Clone, Debug)]
pub struct LiveConfig {
    /// WebSocket endpoint, without the key query parameter.
    pub endpoint: String,
    /// API key appended to the endpoint as `?key=`.
    pub api_key: String,
    /// Model name, without the `models/` prefix.
    pub model: String,
    /// Offer context-window compression in the setup handshake.
    pub enable_compression: bool,
    /// Retries allowed after a failed connect before the session goes to a
    /// terminal error.
    pub max_retries: u32,
    /// Backoff unit; the wait before retry `k` is `base_delay * k`.
    pub base_delay: Duration,
    /// Budget for the whole handshake: socket open through setup-complete.
    pub connect_timeout: Duration,
    /// Sampling interval of the inbound-staleness monitor.
    pub liveness_interval: Duration,
    /// Inbound silence beyond this flags the response as delayed.
    pub response_delay_threshold: Duration,
    /// Outbound video frames kept for the end-of-session hook.
    pub recent_frame_capacity: usize,
}

impl LiveConfig {
    /// Configuration with production defaults for the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            enable_compression: true,
            max_retries: 3,
            base_delay: Duration::from_millis(2000),
            connect_timeout: Duration::from_secs(15),
            liveness_interval: Duration::from_secs(1),
            response_delay_threshold: Duration::from_secs(5),
            recent_frame_capacity: 5,
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// `GEMINI_API_KEY` is required; `GEMINI_LIVE_MODEL` and
    /// `GEMINI_LIVE_ENDPOINT` override the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "GEMINI_API_KEY".to_string(),
                "key is empty".to_string(),
            ));
        }

        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("GEMINI_LIVE_MODEL") {
            config.model = model;
        }
        if let Ok(endpoint) = std::env::var("GEMINI_LIVE_ENDPOINT") {
            if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
                return Err(ConfigError::InvalidValue(
                    "GEMINI_LIVE_ENDPOINT".to_string(),
                    format!("'{}' is not a ws:// or wss:// URL", endpoint),
                ));
            }
            config.endpoint = endpoint;
        }
        Ok(config)
    }

    /// Full connect URL with the key attached.
    pub fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }

    /// Model identifier as the setup message expects it.
    pub fn qualified_model(&self) -> String {
        format!("models/{}", self.model)
    }
}
