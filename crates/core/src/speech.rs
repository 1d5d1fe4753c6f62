//! Remote speech client
//!
//! Sends one chunk of inbound audio to the conversational speech endpoint and
//! returns the synthesized response audio. A call is a single HTTP POST:
//!
//! ```text
//! POST <endpoint>
//! Authorization: Bearer <credential>
//! Content-Type: audio/wav
//!
//! <raw audio bytes>
//! ```
//!
//! Any non-2xx status or transport failure is [`Error::RemoteUnavailable`].
//! Failures are never retried here; retry policy belongs to the caller.

use crate::config::SpeechConfig;
use crate::credential::Credential;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Outcome of one relay round: synthesized audio or a classified failure
pub type RelayResponse = Result<Bytes>;

/// Audio payload plus the headers it travels with
#[derive(Debug, Clone)]
pub struct RelayRequest {
    payload: Bytes,
    content_type: String,
}

impl RelayRequest {
    pub fn new(payload: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            payload,
            content_type: content_type.into(),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Render onto an HTTP POST carrying the bearer credential
    pub fn into_http(
        self,
        client: &reqwest::Client,
        endpoint: &str,
        credential: &Credential,
    ) -> reqwest::RequestBuilder {
        client
            .post(endpoint)
            .header(AUTHORIZATION, credential.bearer())
            .header(CONTENT_TYPE, self.content_type)
            .body(self.payload)
    }
}

/// Client for the remote conversational speech endpoint
///
/// Implementations must return promptly with [`Error::Cancelled`] once
/// `cancel` fires, rather than waiting for the network timeout.
#[async_trait]
pub trait SpeechClient: Send + Sync {
    /// Send one audio payload and wait for the response audio
    async fn send_audio(&self, payload: Bytes, cancel: &CancellationToken) -> RelayResponse;

    /// Get the name of this client (for logging)
    fn name(&self) -> &str;
}

/// HTTP implementation of [`SpeechClient`]
pub struct HttpSpeechClient {
    http_client: reqwest::Client,
    config: SpeechConfig,
    credential: Credential,
}

impl HttpSpeechClient {
    /// Create a client for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: SpeechConfig, credential: Credential) -> Result<Self> {
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

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn post(&self, request: RelayRequest) -> RelayResponse {
        let response = request
            .into_http(&self.http_client, &self.config.endpoint, &self.credential)
            .send()
            .await
            .map_err(|e| Error::transport(format!("Speech request failed: {}", e)))?;

        let status = response.status();
        debug!(status = status.as_u16(), "Speech endpoint responded");

        if !status.is_success() {
            return Err(Error::RemoteUnavailable {
                status: Some(status.as_u16()),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::transport(format!("Failed to read speech response: {}", e)))?;

        debug!(bytes = body.len(), "Received response audio");

        Ok(body)
    }
}

#[async_trait]
impl SpeechClient for HttpSpeechClient {
    #[instrument(skip_all, fields(endpoint = %self.config.endpoint, bytes = payload.len()))]
    async fn send_audio(&self, payload: Bytes, cancel: &CancellationToken) -> RelayResponse {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let request = RelayRequest::new(payload, self.config.content_type.clone());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Speech request cancelled");
                Err(Error::Cancelled)
            }
            result = self.post(request) => result,
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
