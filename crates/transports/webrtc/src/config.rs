//! Configuration types for the WebRTC relay

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use voicerelay_core::{CompletionConfig, SpeechConfig};

/// Main configuration for a relay session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Remote speech endpoint
    pub speech: SpeechConfig,

    /// Chat-completion endpoint for the fallback flow
    pub completion: CompletionConfig,

    /// STUN server URLs (empty: host candidates only)
    pub stun_servers: Vec<String>,

    /// Codec used for substituted outbound tracks
    pub outbound: OutboundCodecConfig,

    /// Wait between receiver polls while no inbound media exists (default: 100ms)
    pub receiver_poll_interval_ms: u64,

    /// Upper bound on a single inbound frame read (default: 1000ms)
    pub frame_read_timeout_ms: u64,

    /// Pause between relay iterations (default: 10ms)
    pub iteration_delay_ms: u64,

    /// How long stop waits for the relay task before forcing close (default: 2000ms)
    pub shutdown_grace_ms: u64,

    /// Upper bound on the whole offer/answer exchange (default: 10000ms)
    pub negotiation_timeout_ms: u64,
}

/// Outbound audio codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundCodecConfig {
    /// MIME type (default: audio/opus)
    pub mime_type: String,

    /// RTP clock rate in Hz (default: 48000)
    pub clock_rate: u32,

    /// Channel count (default: 2)
    pub channels: u16,

    /// Duration stamped on each written sample (default: 20ms)
    pub sample_duration_ms: u64,
}

impl Default for OutboundCodecConfig {
    fn default() -> Self {
        Self {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48_000,
            channels: 2,
            sample_duration_ms: 20,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            speech: SpeechConfig::default(),
            completion: CompletionConfig::default(),
            stun_servers: Vec::new(),
            outbound: OutboundCodecConfig::default(),
            receiver_poll_interval_ms: 100,
            frame_read_timeout_ms: 1_000,
            iteration_delay_ms: 10,
            shutdown_grace_ms: 2_000,
            negotiation_timeout_ms: 10_000,
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file
    ///
    /// Missing fields fall back to their defaults. The result is validated.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text).map_err(|e| {
            Error::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `speech` or `completion` is invalid
    /// - a STUN server URL does not start with `stun:`, `stuns:`, `turn:` or `turns:`
    /// - any interval or timeout is zero
    /// - the outbound codec has an empty MIME type, zero clock rate or zero channels
    pub fn validate(&self) -> Result<()> {
        self.speech.validate()?;
        self.completion.validate()?;

        for url in &self.stun_servers {
            if !["stun:", "stuns:", "turn:", "turns:"]
                .iter()
                .any(|scheme| url.starts_with(scheme))
            {
                return Err(Error::InvalidConfig(format!(
                    "stun_servers entries must start with stun: or turn:, got {}",
                    url
                )));
            }
        }

        for (name, value) in [
            ("receiver_poll_interval_ms", self.receiver_poll_interval_ms),
            ("frame_read_timeout_ms", self.frame_read_timeout_ms),
            ("shutdown_grace_ms", self.shutdown_grace_ms),
            ("negotiation_timeout_ms", self.negotiation_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.outbound.mime_type.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "outbound.mime_type must not be empty".to_string(),
            ));
        }

        if self.outbound.clock_rate == 0 || self.outbound.channels == 0 {
            return Err(Error::InvalidConfig(format!(
                "outbound codec needs a clock rate and channel count, got {}Hz/{}ch",
                self.outbound.clock_rate, self.outbound.channels
            )));
        }

        Ok(())
    }

    pub fn receiver_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receiver_poll_interval_ms)
    }

    pub fn frame_read_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_read_timeout_ms)
    }

    pub fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.iteration_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    /// Override the shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Override the STUN servers
    pub fn with_stun_servers(mut self, servers: Vec<String>) -> Self {
        self.stun_servers = servers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.receiver_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.iteration_delay(), Duration::from_millis(10));
        assert_eq!(config.outbound.mime_type, "audio/opus");
        assert_eq!(config.outbound.clock_rate, 48_000);
    }

    #[test]
    fn test_invalid_stun_server() {
        let config =
            RelayConfig::default().with_stun_servers(vec!["stun.example.com:3478".to_string()]);
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_zero_grace_rejected() {
        let config = RelayConfig::default().with_shutdown_grace(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_speech_endpoint_surfaces_core_error() {
        let mut config = RelayConfig::default();
        config.speech.endpoint = "ftp://example.com".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Core(_)));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
stun_servers = ["stun:stun.l.google.com:19302"]
shutdown_grace_ms = 500

[speech]
endpoint = "http://localhost:9000/speech"

[outbound]
channels = 1
"#
        )
        .unwrap();

        let config = RelayConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.shutdown_grace(), Duration::from_millis(500));
        assert_eq!(config.speech.endpoint, "http://localhost:9000/speech");
        assert_eq!(config.outbound.channels, 1);
        assert_eq!(config.outbound.clock_rate, 48_000);
        assert_eq!(config.frame_read_timeout_ms, 1_000);
    }

    #[test]
    fn test_from_toml_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "shutdown_grace_ms = \"soon\"").unwrap();
        let err = RelayConfig::from_toml_file(file.path()).unwrap_err();
        assert!(err.is_config_error());
    }
}
