//! Audio data carried through the relay
//!
//! [`AudioFrame`] is the unit read from an inbound track. Frames are immutable
//! once constructed; the payload is reference-counted so forwarding a frame to
//! the speech client never copies the audio bytes.

use bytes::Bytes;
use std::time::Duration;

/// One inbound audio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    payload: Bytes,
    sample_rate: u32,
    channels: u16,
    timestamp_us: u64,
}

impl AudioFrame {
    /// Create a frame
    ///
    /// # Arguments
    ///
    /// * `payload` - Raw audio payload bytes
    /// * `sample_rate` - Sample rate in Hz
    /// * `channels` - Channel count
    /// * `timestamp_us` - Capture timestamp in microseconds
    pub fn new(payload: Bytes, sample_rate: u32, channels: u16, timestamp_us: u64) -> Self {
        Self {
            payload,
            sample_rate,
            channels,
            timestamp_us,
        }
    }

    /// Build a frame from an RTP timestamp expressed in clock-rate units
    pub fn from_rtp(payload: Bytes, clock_rate: u32, channels: u16, rtp_timestamp: u32) -> Self {
        let timestamp_us = if clock_rate == 0 {
            0
        } else {
            u64::from(rtp_timestamp) * 1_000_000 / u64::from(clock_rate)
        };
        Self::new(payload, clock_rate, channels, timestamp_us)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Capture timestamp as a `Duration` since the stream origin
    pub fn timestamp(&self) -> Duration {
        Duration::from_micros(self.timestamp_us)
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the frame, returning its payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
