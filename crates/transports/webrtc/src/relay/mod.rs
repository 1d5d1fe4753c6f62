//! Audio relay loop
//!
//! Reads inbound frames from a [`MediaConnection`], forwards them to a
//! [`SpeechClient`] and substitutes the outbound track with each response.
//!
//! At most one speech call is in flight. The call runs concurrently with
//! frame reads; frames read while it is outstanding are dropped, never
//! queued. Every suspension point is raced against the session's
//! cancellation token, except the track substitution itself, which must not
//! be interrupted halfway.

use crate::config::RelayConfig;
use crate::media::OutboundTrack;
use crate::peer::MediaConnection;
use crate::session::SessionId;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use voicerelay_core::SpeechClient;

type SpeechCall = BoxFuture<'static, voicerelay_core::Result<Bytes>>;

/// Why a relay loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayExit {
    /// Session shutdown was requested
    Cancelled,
    /// The connection closed or failed underneath the loop
    ConnectionLost(String),
}

/// Counters shared between a relay loop and its observers
#[derive(Debug, Default)]
pub struct RelayStats {
    frames_read: AtomicU64,
    frames_dropped: AtomicU64,
    responses_relayed: AtomicU64,
    failed_rounds: AtomicU64,
}

impl RelayStats {
    /// Inbound frames read
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    /// Frames dropped because a speech call was in flight
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Responses attached as outbound tracks
    pub fn responses_relayed(&self) -> u64 {
        self.responses_relayed.load(Ordering::Relaxed)
    }

    /// Rounds that failed at the speech call or the substitution
    pub fn failed_rounds(&self) -> u64 {
        self.failed_rounds.load(Ordering::Relaxed)
    }
}

/// Wait for the in-flight call, or forever if there is none
async fn next_response(in_flight: &mut Option<SpeechCall>) -> voicerelay_core::Result<Bytes> {
    match in_flight.as_mut() {
        Some(call) => {
            let result = call.await;
            *in_flight = None;
            result
        }
        None => std::future::pending().await,
    }
}

/// The relay process for one session
pub struct AudioRelayLoop {
    session_id: SessionId,
    connection: Arc<dyn MediaConnection>,
    speech: Arc<dyn SpeechClient>,
    cancel: CancellationToken,
    stats: Arc<RelayStats>,
    poll_interval: Duration,
    read_timeout: Duration,
    iteration_delay: Duration,
}

impl AudioRelayLoop {
    pub fn new(
        session_id: SessionId,
        connection: Arc<dyn MediaConnection>,
        speech: Arc<dyn SpeechClient>,
        cancel: CancellationToken,
        config: &RelayConfig,
    ) -> Self {
        Self {
            session_id,
            connection,
            speech,
            cancel,
            stats: Arc::new(RelayStats::default()),
            poll_interval: config.receiver_poll_interval(),
            read_timeout: config.frame_read_timeout(),
            iteration_delay: config.iteration_delay(),
        }
    }

    /// Report into an existing stats handle
    pub fn with_stats(mut self, stats: Arc<RelayStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Run until cancelled or the connection is lost
    pub async fn run(self) -> RelayExit {
        info!(
            session_id = %self.session_id,
            connection_id = self.connection.id(),
            speech = self.speech.name(),
            "Relay loop started"
        );

        let exit = self.relay().await;

        info!(session_id = %self.session_id, ?exit, "Relay loop finished");
        exit
    }

    async fn relay(&self) -> RelayExit {
        let mut in_flight: Option<SpeechCall> = None;

        loop {
            if self.cancel.is_cancelled() {
                return RelayExit::Cancelled;
            }

            let receivers = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return RelayExit::Cancelled,
                result = next_response(&mut in_flight) => {
                    self.deliver(result).await;
                    continue;
                }
                receivers = self.connection.inbound_receivers() => receivers,
            };

            let receivers = match receivers {
                Ok(receivers) => receivers,
                Err(e) if e.is_connection_lost() => {
                    warn!(session_id = %self.session_id, error = %e, "Connection lost");
                    return RelayExit::ConnectionLost(e.to_string());
                }
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "Failed to list receivers");
                    Vec::new()
                }
            };

            let Some(receiver) = receivers.into_iter().next() else {
                // No client media yet
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return RelayExit::Cancelled,
                    result = next_response(&mut in_flight) => self.deliver(result).await,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
                continue;
            };

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return RelayExit::Cancelled,
                result = next_response(&mut in_flight) => {
                    self.deliver(result).await;
                    continue;
                }
                read = tokio::time::timeout(self.read_timeout, receiver.read_frame()) => read,
            };

            match read {
                Err(_) => {
                    trace!(receiver = receiver.id(), "No frame within read timeout");
                    continue;
                }
                Ok(Err(e)) if e.is_connection_lost() => {
                    warn!(session_id = %self.session_id, error = %e, "Connection lost");
                    return RelayExit::ConnectionLost(e.to_string());
                }
                Ok(Err(e)) => {
                    debug!(receiver = receiver.id(), error = %e, "Frame read failed");
                }
                Ok(Ok(frame)) => {
                    self.stats.frames_read.fetch_add(1, Ordering::Relaxed);

                    if in_flight.is_some() {
                        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(bytes = frame.len(), "Dropping frame, speech call in flight");
                    } else {
                        debug!(bytes = frame.len(), "Forwarding frame to speech service");
                        in_flight = Some(self.start_call(frame.into_payload()));
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return RelayExit::Cancelled,
                _ = tokio::time::sleep(self.iteration_delay) => {}
            }
        }
    }

    fn start_call(&self, payload: Bytes) -> SpeechCall {
        let speech = Arc::clone(&self.speech);
        let cancel = self.cancel.clone();
        Box::pin(async move { speech.send_audio(payload, &cancel).await })
    }

    async fn deliver(&self, response: voicerelay_core::Result<Bytes>) {
        match response {
            Ok(audio) if audio.is_empty() => {
                debug!(session_id = %self.session_id, "Empty response, nothing to relay");
            }
            Ok(audio) => {
                let track = OutboundTrack::new(audio);
                let track_id = track.id().to_string();
                let bytes = track.len();

                match self.connection.attach_outbound(track).await {
                    Ok(()) => {
                        self.stats.responses_relayed.fetch_add(1, Ordering::Relaxed);
                        debug!(session_id = %self.session_id, track_id = %track_id, bytes, "Relayed response");
                    }
                    Err(e) => {
                        self.stats.failed_rounds.fetch_add(1, Ordering::Relaxed);
                        warn!(session_id = %self.session_id, error = %e, "Failed to attach response track");
                    }
                }
            }
            Err(e) if e.is_cancelled() => {
                debug!(session_id = %self.session_id, "Speech call cancelled");
            }
            Err(e) => {
                self.stats.failed_rounds.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_id = %self.session_id,
                    speech = self.speech.name(),
                    error = %e,
                    "Relay round failed"
                );
            }
        }

        if !self.cancel.is_cancelled() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.iteration_delay) => {}
            }
        }
    }
}
