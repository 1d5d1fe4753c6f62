//! Outbound response tracks and remote inbound receivers

use super::InboundReceiver;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use voicerelay_core::AudioFrame;
use webrtc::track::track_remote::TrackRemote;

/// Audio attached to the outbound side of a connection
///
/// Each response from the speech service becomes a new track with a fresh
/// id. The placeholder attached at negotiation time carries no audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundTrack {
    id: String,
    audio: Bytes,
}

impl OutboundTrack {
    /// Create a track carrying `audio`
    pub fn new(audio: Bytes) -> Self {
        Self {
            id: format!("response-{}", uuid::Uuid::new_v4()),
            audio,
        }
    }

    /// Silent track attached before any response exists
    pub fn placeholder() -> Self {
        Self {
            id: format!("placeholder-{}", uuid::Uuid::new_v4()),
            audio: Bytes::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn audio(&self) -> &Bytes {
        &self.audio
    }

    pub fn len(&self) -> usize {
        self.audio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
    }
}

/// Inbound receiver over a webrtc-rs remote track
///
/// Each read yields the payload of one RTP packet. Payloads are forwarded as
/// they arrive; nothing is decoded or transcoded.
pub struct RemoteAudioReceiver {
    id: String,
    track: Arc<TrackRemote>,
    ended: AtomicBool,
    packets: AtomicU64,
}

impl RemoteAudioReceiver {
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id(),
            track,
            ended: AtomicBool::new(false),
            packets: AtomicU64::new(0),
        }
    }

    /// True once a read has failed; ended receivers are no longer listed
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Packets read so far
    pub fn packets_read(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl InboundReceiver for RemoteAudioReceiver {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read_frame(&self) -> Result<AudioFrame> {
        if self.is_ended() {
            return Err(Error::MediaTrackError(format!(
                "Remote track {} has ended",
                self.id
            )));
        }

        let (packet, _attributes) = self.track.read_rtp().await.map_err(|e| {
            self.ended.store(true, Ordering::Release);
            debug!("Remote track {} ended: {}", self.id, e);
            Error::MediaTrackError(format!("Failed to read RTP: {}", e))
        })?;

        self.packets.fetch_add(1, Ordering::Relaxed);

        let codec = self.track.codec();
        Ok(AudioFrame::from_rtp(
            packet.payload,
            codec.capability.clock_rate,
            codec.capability.channels,
            packet.header.timestamp,
        ))
    }
}
