//! Transcription, synthesis and completion collaborators
//!
//! None of these are on the realtime relay path. They are composed by
//! [`FallbackResponder`] for turns handled outside the speech endpoint: the
//! user's audio is transcribed, answered by a text completion and spoken back.

use crate::config::CompletionConfig;
use crate::credential::Credential;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Opening line spoken when a session starts
pub const GREETING: &str = "Hi there! How can I help you?";

/// Spoken when a transcription came back empty
pub const UNRECOGNIZED_SPEECH_REPLY: &str = "Sorry, I couldn't understand that.";

/// Spoken when transcription itself failed
pub const TRANSCRIPTION_ERROR_REPLY: &str = "Sorry, there was an error processing your speech.";

/// Spoken when the completion call failed
pub const COMPLETION_ERROR_REPLY: &str =
    "I'm sorry, I'm having trouble processing that. Could you please try rephrasing?";

/// Speech-to-text
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Bytes) -> Result<String>;
}

/// Text-to-speech
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Bytes>;
}

/// Text completion
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, text: &str) -> Result<String>;

    /// Get the name of this completer (for logging)
    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP chat-completion client
pub struct ChatCompleter {
    http_client: reqwest::Client,
    config: CompletionConfig,
    credential: Credential,
}

impl ChatCompleter {
    pub fn new(config: CompletionConfig, credential: Credential) -> Result<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
            credential,
        })
    }
}

#[async_trait]
impl Completer for ChatCompleter {
    async fn complete(&self, text: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
        };

        let response = self
            .http_client
            .post(&self.config.endpoint)
            .header(reqwest::header::AUTHORIZATION, self.credential.bearer())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Collaborator(format!("Completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Collaborator(format!(
                "Completion API error {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Collaborator(format!("Failed to parse completion: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| Error::Collaborator("Completion returned no content".to_string()))
    }

    fn name(&self) -> &str {
        "chat"
    }
}

/// Transcribe, complete, synthesize
///
/// Transcription and completion failures are replaced with fixed apology
/// text so every turn produces something speakable. Only a synthesis failure
/// is returned to the caller.
pub struct FallbackResponder {
    transcriber: Arc<dyn Transcriber>,
    completer: Arc<dyn Completer>,
    synthesizer: Arc<dyn Synthesizer>,
}

impl FallbackResponder {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        completer: Arc<dyn Completer>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            transcriber,
            completer,
            synthesizer,
        }
    }

    /// Text reply for one turn of user audio
    pub async fn reply_text(&self, audio: Bytes) -> String {
        let transcript = match self.transcriber.transcribe(audio).await {
            Ok(text) if text.trim().is_empty() => return UNRECOGNIZED_SPEECH_REPLY.to_string(),
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Transcription failed");
                return TRANSCRIPTION_ERROR_REPLY.to_string();
            }
        };

        debug!(chars = transcript.len(), completer = self.completer.name(), "Transcribed turn");

        match self.completer.complete(&transcript).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Completion failed");
                COMPLETION_ERROR_REPLY.to_string()
            }
        }
    }

    /// Spoken reply for one turn of user audio
    pub async fn respond(&self, audio: Bytes) -> Result<Bytes> {
        let text = self.reply_text(audio).await;
        self.synthesizer.synthesize(&text).await
    }

    /// Spoken [`GREETING`]
    pub async fn greet(&self) -> Result<Bytes> {
        self.synthesizer.synthesize(GREETING).await
    }
}
