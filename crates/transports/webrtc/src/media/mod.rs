//! Audio tracks attached to a relay connection
//!
//! Inbound audio arrives through [`InboundReceiver`]s, one per remote audio
//! track. Outbound audio is an [`OutboundTrack`]: the relay substitutes a new
//! one for every response it receives.

pub mod tracks;

pub use tracks::{OutboundTrack, RemoteAudioReceiver};

use crate::Result;
use async_trait::async_trait;
use voicerelay_core::AudioFrame;

/// A source of inbound audio frames
#[async_trait]
pub trait InboundReceiver: Send + Sync {
    /// Receiver identifier (the remote track id)
    fn id(&self) -> &str;

    /// Wait for the next frame
    ///
    /// Returns [`crate::Error::ConnectionClosed`] when the underlying
    /// connection is gone, and other errors for a receiver that has ended.
    async fn read_frame(&self) -> Result<AudioFrame>;
}
