//! Error types for VoiceRelay core

use thiserror::Error;

/// Result type alias for VoiceRelay core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in VoiceRelay core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Required credential missing from the environment
    #[error("Missing credential: {0} is not set")]
    MissingCredential(String),

    /// Remote speech endpoint failed (non-2xx status or transport failure)
    #[error("Remote speech service unavailable{}: {reason}", .status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    RemoteUnavailable {
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Failure description
        reason: String,
    },

    /// Operation interrupted by session shutdown
    #[error("Operation cancelled")]
    Cancelled,

    /// Transcription, synthesis or completion collaborator failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl Error {
    /// Build a `RemoteUnavailable` for a transport-level failure (no response)
    pub fn transport(reason: impl Into<String>) -> Self {
        Error::RemoteUnavailable {
            status: None,
            reason: reason.into(),
        }
    }

    /// Check if this error came from the remote speech endpoint
    pub fn is_remote_unavailable(&self) -> bool {
        matches!(self, Error::RemoteUnavailable { .. })
    }

    /// Check if this error is a cancellation signal rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::ConfigError(_) | Error::MissingCredential(_) | Error::Toml(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ConfigError("test".to_string());
        assert_eq!(err.to_string(), "Configuration error: test");
    }

    #[test]
    fn test_remote_unavailable_display() {
        let err = Error::RemoteUnavailable {
            status: Some(503),
            reason: "Service Unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Remote speech service unavailable (status 503): Service Unavailable"
        );

        let err = Error::transport("connection refused");
        assert_eq!(
            err.to_string(),
            "Remote speech service unavailable: connection refused"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Cancelled.is_remote_unavailable());
        assert!(Error::transport("x").is_remote_unavailable());
        assert!(Error::MissingCredential("OPENAI_API_KEY".into()).is_config_error());
        assert!(!Error::Collaborator("x".into()).is_config_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }
}
