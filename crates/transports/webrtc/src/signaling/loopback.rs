//! In-process signaling counterpart

use super::{SignalingAnswer, SignalingChannel};
use crate::peer::{build_api, rtc_configuration};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Answers offers with a second, local peer connection
///
/// The answering peer is returned alongside the answer so it lives exactly as
/// long as the connection it negotiated with.
pub struct LoopbackSignaling {
    stun_servers: Vec<String>,
}

impl LoopbackSignaling {
    pub fn new(stun_servers: Vec<String>) -> Self {
        Self { stun_servers }
    }

    async fn answer(peer_connection: &RTCPeerConnection, offer_sdp: String) -> Result<String> {
        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| Error::NegotiationError(format!("Failed to parse offer: {}", e)))?;

        peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| {
                Error::NegotiationError(format!("Failed to set remote description: {}", e))
            })?;

        let answer = peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to create answer: {}", e)))?;

        let mut gather_complete = peer_connection.gathering_complete_promise().await;

        peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| {
                Error::NegotiationError(format!("Failed to set local description: {}", e))
            })?;

        let _ = gather_complete.recv().await;

        let local_desc = peer_connection.local_description().await.ok_or_else(|| {
            Error::NegotiationError("No local description after setting answer".to_string())
        })?;

        Ok(local_desc.sdp)
    }
}

impl Default for LoopbackSignaling {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Answering peer that is closed on drop unless handed over
///
/// The exchange future can be dropped at any await (negotiation timeout or
/// session cancellation); the peer must not outlive it unclosed.
struct AnsweringPeer {
    peer_connection: Option<Arc<RTCPeerConnection>>,
}

impl AnsweringPeer {
    fn new(peer_connection: Arc<RTCPeerConnection>) -> Self {
        Self {
            peer_connection: Some(peer_connection),
        }
    }

    /// Hand the peer to the caller; it is no longer closed on drop
    fn disarm(mut self) -> Option<Arc<RTCPeerConnection>> {
        self.peer_connection.take()
    }

    async fn close(mut self) {
        if let Some(peer_connection) = self.peer_connection.take() {
            if let Err(e) = peer_connection.close().await {
                warn!("Failed to close answering peer: {}", e);
            }
        }
    }
}

impl Drop for AnsweringPeer {
    fn drop(&mut self) {
        let Some(peer_connection) = self.peer_connection.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Closing abandoned answering peer");
                runtime.spawn(async move {
                    if let Err(e) = peer_connection.close().await {
                        warn!("Failed to close abandoned answering peer: {}", e);
                    }
                });
            }
            Err(_) => warn!("Answering peer dropped outside a runtime, not closed"),
        }
    }
}

#[async_trait]
impl SignalingChannel for LoopbackSignaling {
    async fn exchange(&self, offer_sdp: String) -> Result<SignalingAnswer> {
        let api = build_api()?;
        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_configuration(&self.stun_servers))
                .await
                .map_err(|e| {
                    Error::PeerConnectionError(format!("Failed to create answering peer: {}", e))
                })?,
        );
        let guard = AnsweringPeer::new(Arc::clone(&peer_connection));

        match Self::answer(&peer_connection, offer_sdp).await {
            Ok(sdp) => {
                debug!("Loopback answer ready ({} bytes)", sdp.len());
                Ok(SignalingAnswer {
                    sdp,
                    counterpart: guard.disarm(),
                })
            }
            Err(e) => {
                guard.close().await;
                Err(e)
            }
        }
    }
}
