//! Configuration for the remote speech and completion endpoints

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default conversational speech endpoint
pub const DEFAULT_SPEECH_ENDPOINT: &str = "https://api.openai.com/v1/audio/conversations";

/// Default chat-completion endpoint
pub const DEFAULT_COMPLETION_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default model for text completions
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-realtime-preview";

/// Default system prompt for text completions
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful and empathetic digital therapist. \
Provide supportive and insightful responses to the user's input.";

/// Remote speech endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Endpoint receiving raw audio via HTTP POST (http:// or https://)
    pub endpoint: String,

    /// Request timeout in milliseconds (default: 30000)
    pub request_timeout_ms: u64,

    /// Content type sent with the audio body (default: audio/wav)
    pub content_type: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SPEECH_ENDPOINT.to_string(),
            request_timeout_ms: 30_000,
            content_type: "audio/wav".to_string(),
        }
    }
}

impl SpeechConfig {
    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        validate_http_url("speech.endpoint", &self.endpoint)?;

        if self.request_timeout_ms == 0 {
            return Err(Error::ConfigError(
                "speech.request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.content_type.trim().is_empty() {
            return Err(Error::ConfigError(
                "speech.content_type must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Chat-completion endpoint configuration (non-realtime fallback flow)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Chat-completion endpoint
    pub endpoint: String,

    /// Model identifier
    pub model: String,

    /// System prompt prepended to every request
    pub system_prompt: String,

    /// Request timeout in milliseconds (default: 30000)
    pub request_timeout_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_COMPLETION_ENDPOINT.to_string(),
            model: DEFAULT_COMPLETION_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl CompletionConfig {
    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        validate_http_url("completion.endpoint", &self.endpoint)?;

        if self.model.trim().is_empty() {
            return Err(Error::ConfigError(
                "completion.model must not be empty".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(Error::ConfigError(
                "completion.request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_http_url(field: &str, url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(Error::ConfigError(format!(
            "{} must start with http:// or https://, got {}",
            field, url
        )));
    }
    Ok(())
}
