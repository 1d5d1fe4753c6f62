//! WebRTC session relay for VoiceRelay
//!
//! Bridges a live two-way audio peer connection to a remote conversational
//! speech service: inbound frames are forwarded to the service and each
//! response replaces the outbound track.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  SessionController (one session at a time)             │
//! │  ├─ Negotiator → SignalingNegotiator                   │
//! │  │   ├─ PeerConnectionManager (webrtc-rs connection)   │
//! │  │   └─ SignalingChannel → LoopbackSignaling           │
//! │  └─ relay task registry (SessionId → JoinHandle)       │
//! │     └─ AudioRelayLoop                                  │
//! │         ├─ MediaConnection::inbound_receivers          │
//! │         ├─ SpeechClient::send_audio (one in flight)    │
//! │         └─ MediaConnection::attach_outbound            │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use voicerelay_webrtc::RelayConfig;
//!
//! let config = RelayConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.receiver_poll_interval_ms, 100);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use voicerelay_core::{Credential, HttpSpeechClient};
//! use voicerelay_webrtc::{RelayConfig, SessionController, SignalingNegotiator};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RelayConfig::default();
//! let speech = HttpSpeechClient::new(config.speech.clone(), Credential::from_env()?)?;
//!
//! let controller = SessionController::new(
//!     tokio::runtime::Handle::current(),
//!     Arc::new(SignalingNegotiator::loopback(config.clone())),
//!     Arc::new(speech),
//!     config,
//! );
//!
//! controller.start().await?;
//! // ... conversation ...
//! controller.stop().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;

pub use config::{OutboundCodecConfig, RelayConfig};
pub use error::{Error, Result};
pub use media::{InboundReceiver, OutboundTrack, RemoteAudioReceiver};
pub use peer::{ConnectionState, MediaConnection, PeerConnectionManager};
pub use relay::{AudioRelayLoop, RelayExit, RelayStats};
pub use session::{Session, SessionController, SessionId, SessionState};
pub use signaling::{
    LoopbackSignaling, Negotiator, SignalingAnswer, SignalingChannel, SignalingNegotiator,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
