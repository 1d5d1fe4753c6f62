//! Core types for VoiceRelay
//!
//! This crate holds everything the relay needs that is not tied to a media
//! transport:
//!
//! - **Audio frames**: immutable [`AudioFrame`] values read from inbound tracks
//! - **Remote speech client**: [`SpeechClient`] trait and the HTTP implementation
//!   that forwards audio to the conversational speech endpoint
//! - **Credentials**: bearer [`Credential`] read once at process start
//! - **Collaborators**: transcription, synthesis and completion interfaces plus
//!   the [`FallbackResponder`] that composes them for non-realtime turns
//!
//! # Example
//!
//! ```
//! use voicerelay_core::{AudioFrame, SpeechConfig};
//!
//! let frame = AudioFrame::new(vec![0u8; 320].into(), 48_000, 1, 0);
//! assert_eq!(frame.len(), 320);
//!
//! let config = SpeechConfig::default();
//! assert!(config.validate().is_ok());
//! ```

#![warn(clippy::all)]

pub mod collaborators;
pub mod config;
pub mod credential;
pub mod data;
pub mod error;
pub mod speech;

pub use collaborators::{
    ChatCompleter, Completer, FallbackResponder, Synthesizer, Transcriber, GREETING,
};
pub use config::{CompletionConfig, SpeechConfig};
pub use credential::Credential;
pub use data::AudioFrame;
pub use error::{Error, Result};
pub use speech::{HttpSpeechClient, RelayRequest, RelayResponse, SpeechClient};

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
