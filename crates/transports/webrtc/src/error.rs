//! Error types for the WebRTC relay transport

use crate::session::SessionState;

/// Result type alias using WebRTC relay Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in session relay operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Offer/answer exchange failed; the session never became active
    #[error("Negotiation failed: {0}")]
    NegotiationError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Closing a transceiver or connection failed during shutdown
    #[error("Resource cleanup failed: {0}")]
    ResourceCleanupError(String),

    /// The underlying connection is closed or failed
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A session is already negotiating or active
    #[error("Session already active (state: {0})")]
    AlreadyActive(SessionState),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Operation interrupted by session shutdown
    #[error("Operation cancelled")]
    Cancelled,

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Error from the core crate (speech client, config, credential)
    #[error(transparent)]
    Core(#[from] voicerelay_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtcError(err.to_string())
    }
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::NegotiationError(_) | Error::IoError(_) => true,
            Error::Core(e) => e.is_remote_unavailable(),
            _ => false,
        }
    }

    /// Check if this error is a negotiation failure
    pub fn is_negotiation_error(&self) -> bool {
        matches!(self, Error::NegotiationError(_))
    }

    /// Check if this error is a cancellation signal rather than a failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Core(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Check if the connection itself is unusable
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::ConnectionClosed(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        match self {
            Error::InvalidConfig(_) => true,
            Error::Core(e) => e.is_config_error(),
            _ => false,
        }
    }
}
