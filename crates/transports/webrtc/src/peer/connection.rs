//! WebRTC peer connection wrapper for a relay session

use super::{ConnectionState, MediaConnection};
use crate::config::{OutboundCodecConfig, RelayConfig};
use crate::media::{InboundReceiver, OutboundTrack, RemoteAudioReceiver};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Build a webrtc-rs API with the default codecs and interceptors
pub fn build_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();

    media_engine
        .register_default_codecs()
        .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

    let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
        .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .build())
}

/// Peer connection configuration for the given STUN servers
pub fn rtc_configuration(stun_servers: &[String]) -> RTCConfiguration {
    let ice_servers = stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

fn codec_capability(codec: &OutboundCodecConfig) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: codec.mime_type.clone(),
        clock_rate: codec.clock_rate,
        channels: codec.channels,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Map a webrtc-rs connection state onto [`ConnectionState`]
fn map_peer_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// Apply a state-change callback; returns whether the state moved
fn record_peer_state(
    state: &RwLock<ConnectionState>,
    connection_id: &str,
    reported: RTCPeerConnectionState,
) -> bool {
    let Some(new_state) = map_peer_state(reported) else {
        return false;
    };

    let mut guard = state.write();
    // Closed is final even if a late callback arrives
    if *guard == new_state || *guard == ConnectionState::Closed {
        return false;
    }

    debug!(
        "Connection {} state transition: {:?} -> {:?}",
        connection_id, *guard, new_state
    );
    *guard = new_state;
    true
}

/// Owns one negotiated peer connection
///
/// Holds the placeholder inbound transceiver, the outbound audio sender and
/// the registry of remote audio receivers discovered through `on_track`.
pub struct PeerConnectionManager {
    /// Unique identifier for this connection instance
    connection_id: String,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    /// Current connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Remote audio tracks, in arrival order
    receivers: Arc<RwLock<Vec<Arc<RemoteAudioReceiver>>>>,

    /// Outbound audio sender; its track is swapped on every substitution
    audio_sender: Arc<RTCRtpSender>,

    /// Track currently attached to `audio_sender`
    outbound: Mutex<Option<OutboundTrack>>,

    outbound_codec: OutboundCodecConfig,

    /// Serializes substitutions
    substitution: tokio::sync::Mutex<()>,

    closed: AtomicBool,

    /// Answering peer kept alive for the life of this connection (loopback)
    counterpart: Mutex<Option<Arc<RTCPeerConnection>>>,
}

impl PeerConnectionManager {
    /// Create a peer connection with placeholder inbound and outbound audio
    #[instrument(skip(config))]
    pub async fn new(config: &RelayConfig) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        info!("Creating peer connection: connection_id={}", connection_id);

        let api = build_api()?;
        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_configuration(&config.stun_servers))
                .await
                .map_err(|e| {
                    Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
                })?,
        );

        let state = Arc::new(RwLock::new(ConnectionState::New));
        let receivers = Arc::new(RwLock::new(Vec::new()));

        Self::watch_state(&peer_connection, &connection_id, &state);
        Self::register_receivers(&peer_connection, &connection_id, &receivers);

        let placeholder = OutboundTrack::placeholder();
        let audio_sender = match Self::attach_placeholders(
            &peer_connection,
            &connection_id,
            &config.outbound,
            &placeholder,
        )
        .await
        {
            Ok(sender) => sender,
            Err(e) => {
                if let Err(close_err) = peer_connection.close().await {
                    warn!("Failed to close partially built connection: {}", close_err);
                }
                return Err(e);
            }
        };

        Ok(Self {
            connection_id,
            peer_connection,
            state,
            receivers,
            audio_sender,
            outbound: Mutex::new(Some(placeholder)),
            outbound_codec: config.outbound.clone(),
            substitution: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            counterpart: Mutex::new(None),
        })
    }

    fn watch_state(
        peer_connection: &RTCPeerConnection,
        connection_id: &str,
        state: &Arc<RwLock<ConnectionState>>,
    ) {
        let state = Arc::clone(state);
        let connection_id = connection_id.to_string();

        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                record_peer_state(&state, &connection_id, s);
                Box::pin(async {})
            },
        ));
    }

    fn register_receivers(
        peer_connection: &RTCPeerConnection,
        connection_id: &str,
        receivers: &Arc<RwLock<Vec<Arc<RemoteAudioReceiver>>>>,
    ) {
        let receivers = Arc::clone(receivers);
        let connection_id = connection_id.to_string();

        peer_connection.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            if track.kind() == RTPCodecType::Audio {
                info!(
                    "Remote audio track added on connection {}: codec={}",
                    connection_id,
                    track.codec().capability.mime_type
                );
                receivers
                    .write()
                    .push(Arc::new(RemoteAudioReceiver::new(track)));
            } else {
                debug!(
                    "Ignoring non-audio track on connection {}: kind={}",
                    connection_id,
                    track.kind()
                );
            }
            Box::pin(async {})
        }));
    }

    async fn attach_placeholders(
        peer_connection: &RTCPeerConnection,
        connection_id: &str,
        codec: &OutboundCodecConfig,
        placeholder: &OutboundTrack,
    ) -> Result<Arc<RTCRtpSender>> {
        // Inbound audio from the client
        peer_connection
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| {
                Error::MediaTrackError(format!("Failed to add inbound transceiver: {}", e))
            })?;

        // Outbound audio; the placeholder is replaced by each response
        let track = Arc::new(TrackLocalStaticSample::new(
            codec_capability(codec),
            placeholder.id().to_string(),
            format!("relay-{}", connection_id),
        ));

        // add_track would reuse the recvonly transceiver above; the outbound
        // side needs its own sendonly transceiver.
        let transceiver = peer_connection
            .add_transceiver_from_track(
                track as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add outbound track: {}", e)))?;

        Ok(transceiver.sender().await)
    }

    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Get the underlying WebRTC peer connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    /// Create an SDP offer and wait for ICE gathering to finish
    ///
    /// The returned SDP carries every local candidate, so no trickle exchange
    /// is needed afterwards.
    pub async fn create_offer(&self) -> Result<String> {
        self.set_state(ConnectionState::Connecting);

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to create offer: {}", e)))?;

        let mut gather_complete = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| {
                Error::NegotiationError(format!("Failed to set local description: {}", e))
            })?;

        let _ = gather_complete.recv().await;

        let local_desc = self.peer_connection.local_description().await.ok_or_else(|| {
            Error::NegotiationError("No local description after setting offer".to_string())
        })?;

        debug!("Created SDP offer for connection {}", self.connection_id);

        Ok(local_desc.sdp)
    }

    /// Apply the remote SDP answer
    pub async fn apply_answer(&self, sdp: String) -> Result<()> {
        debug!("Applying remote answer for connection {}", self.connection_id);

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::NegotiationError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| {
                Error::NegotiationError(format!("Failed to set remote description: {}", e))
            })?;

        Ok(())
    }

    /// Keep the answering peer alive until this connection closes
    pub fn retain_counterpart(&self, counterpart: Arc<RTCPeerConnection>) {
        *self.counterpart.lock() = Some(counterpart);
    }

    fn set_state(&self, new_state: ConnectionState) {
        let mut guard = self.state.write();
        if *guard != ConnectionState::Closed {
            *guard = new_state;
        }
    }

    fn sample_duration(&self) -> Duration {
        Duration::from_millis(self.outbound_codec.sample_duration_ms)
    }
}

/// Stop every transceiver, then close the connection and its counterpart
///
/// Returns a description of each step that failed.
async fn teardown(
    peer_connection: Arc<RTCPeerConnection>,
    counterpart: Option<Arc<RTCPeerConnection>>,
) -> Vec<String> {
    let mut failures = Vec::new();

    for transceiver in peer_connection.get_transceivers().await {
        if let Err(e) = transceiver.stop().await {
            failures.push(format!("transceiver stop: {}", e));
        }
    }

    if let Err(e) = peer_connection.close().await {
        failures.push(format!("connection close: {}", e));
    }

    if let Some(counterpart) = counterpart {
        if let Err(e) = counterpart.close().await {
            failures.push(format!("counterpart close: {}", e));
        }
    }

    failures
}

#[async_trait]
impl MediaConnection for PeerConnectionManager {
    fn id(&self) -> &str {
        &self.connection_id
    }

    async fn inbound_receivers(&self) -> Result<Vec<Arc<dyn InboundReceiver>>> {
        let state = self.state();
        if self.is_closed() || state.is_terminal() {
            return Err(Error::ConnectionClosed(format!(
                "connection {} is {:?}",
                self.connection_id, state
            )));
        }

        Ok(self
            .receivers
            .read()
            .iter()
            .filter(|r| !r.is_ended())
            .map(|r| Arc::clone(r) as Arc<dyn InboundReceiver>)
            .collect())
    }

    async fn attach_outbound(&self, track: OutboundTrack) -> Result<()> {
        let _guard = self.substitution.lock().await;

        if self.is_closed() {
            return Err(Error::ConnectionClosed(format!(
                "connection {} is closed",
                self.connection_id
            )));
        }

        let local = Arc::new(TrackLocalStaticSample::new(
            codec_capability(&self.outbound_codec),
            track.id().to_string(),
            format!("relay-{}", self.connection_id),
        ));

        // replace_track detaches the previous track and binds the new one in
        // one call; the sender is never left without a track.
        self.audio_sender
            .replace_track(Some(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to replace track: {}", e)))?;

        let previous = self.outbound.lock().replace(track.clone());
        debug!(
            "Substituted outbound track on connection {}: {:?} -> {} ({} bytes)",
            self.connection_id,
            previous.as_ref().map(OutboundTrack::id),
            track.id(),
            track.len()
        );

        if !track.is_empty() {
            let sample = Sample {
                data: track.audio().clone(),
                duration: self.sample_duration(),
                ..Default::default()
            };
            if let Err(e) = local.write_sample(&sample).await {
                warn!(
                    "Failed to write response audio on connection {}: {}",
                    self.connection_id, e
                );
            }
        }

        Ok(())
    }

    fn outbound_track(&self) -> Option<OutboundTrack> {
        self.outbound.lock().clone()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!("Closing peer connection {}", self.connection_id);

        *self.state.write() = ConnectionState::Closed;
        self.receivers.write().clear();

        // Runs to completion even if the caller stops waiting
        let teardown = tokio::spawn(teardown(
            Arc::clone(&self.peer_connection),
            self.counterpart.lock().take(),
        ));

        let failures = teardown.await.map_err(|e| {
            Error::ResourceCleanupError(format!("teardown task failed: {}", e))
        })?;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::ResourceCleanupError(failures.join("; ")))
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
