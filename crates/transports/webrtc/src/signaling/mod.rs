//! Offer/answer negotiation
//!
//! [`SignalingNegotiator`] builds a [`PeerConnectionManager`], produces a
//! local offer, hands it to a [`SignalingChannel`] and applies the answer it
//! gets back. The whole exchange is bounded by the configured negotiation
//! timeout, and a connection that fails to negotiate is closed before the
//! error is returned.

pub mod loopback;

pub use loopback::LoopbackSignaling;

use crate::config::RelayConfig;
use crate::peer::{MediaConnection, PeerConnectionManager};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use webrtc::peer_connection::RTCPeerConnection;

/// Answer returned by a signaling counterpart
pub struct SignalingAnswer {
    /// SDP answer text
    pub sdp: String,

    /// In-process answering peer, if the counterpart is local
    ///
    /// Kept alive by the negotiated connection and closed with it.
    pub counterpart: Option<Arc<RTCPeerConnection>>,
}

impl SignalingAnswer {
    /// Answer from a remote counterpart
    pub fn remote(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            counterpart: None,
        }
    }
}

/// Carries a local offer to the counterpart and returns its answer
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn exchange(&self, offer_sdp: String) -> Result<SignalingAnswer>;
}

/// Produces a negotiated media connection
#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Negotiate a new connection
    ///
    /// Any failure is a [`Error::NegotiationError`]. Once `cancel` fires the
    /// exchange is abandoned with [`Error::Cancelled`]. No connection is left
    /// open on either path.
    async fn negotiate(&self, cancel: &CancellationToken) -> Result<Arc<dyn MediaConnection>>;
}

/// Reject answers with no usable audio section
pub fn validate_answer(sdp: &str) -> Result<()> {
    if sdp.trim().is_empty() {
        return Err(Error::NegotiationError("Empty SDP answer".to_string()));
    }
    if !sdp.lines().any(|line| line.starts_with("m=audio")) {
        return Err(Error::NegotiationError(
            "SDP answer has no audio media section".to_string(),
        ));
    }
    Ok(())
}

fn into_negotiation_error(err: Error) -> Error {
    match err {
        Error::NegotiationError(_) | Error::Cancelled => err,
        other => Error::NegotiationError(other.to_string()),
    }
}

/// [`Negotiator`] over a webrtc-rs peer connection and a signaling channel
pub struct SignalingNegotiator {
    config: RelayConfig,
    channel: Arc<dyn SignalingChannel>,
}

impl SignalingNegotiator {
    pub fn new(config: RelayConfig, channel: Arc<dyn SignalingChannel>) -> Self {
        Self { config, channel }
    }

    /// Negotiator answering its own offers in-process
    pub fn loopback(config: RelayConfig) -> Self {
        let channel = Arc::new(LoopbackSignaling::new(config.stun_servers.clone()));
        Self::new(config, channel)
    }

    /// Run the exchange on `manager`, closing it on failure or cancellation
    async fn establish(
        &self,
        manager: &PeerConnectionManager,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let timeout = self.config.negotiation_timeout();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, self.exchange(manager)) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::NegotiationError(format!(
                    "Negotiation timed out after {:?}",
                    timeout
                ))),
            },
        };

        if let Err(e) = result {
            if e.is_cancelled() {
                info!("Negotiation cancelled for connection {}", manager.connection_id());
            } else {
                warn!(
                    "Negotiation failed for connection {}: {}",
                    manager.connection_id(),
                    e
                );
            }
            if let Err(close_err) = manager.close().await {
                warn!("Failed to close unnegotiated connection: {}", close_err);
            }
            return Err(into_negotiation_error(e));
        }

        Ok(())
    }

    async fn exchange(&self, manager: &PeerConnectionManager) -> Result<()> {
        let offer = manager.create_offer().await?;
        debug!("Sending offer ({} bytes)", offer.len());

        let answer = self.channel.exchange(offer).await?;

        // Retained before validation so a rejected answer still closes it
        if let Some(counterpart) = answer.counterpart {
            manager.retain_counterpart(counterpart);
        }

        validate_answer(&answer.sdp)?;
        manager.apply_answer(answer.sdp).await
    }
}

#[async_trait]
impl Negotiator for SignalingNegotiator {
    #[instrument(skip_all)]
    async fn negotiate(&self, cancel: &CancellationToken) -> Result<Arc<dyn MediaConnection>> {
        let manager = PeerConnectionManager::new(&self.config)
            .await
            .map_err(into_negotiation_error)?;

        self.establish(&manager, cancel).await?;

        info!("Negotiated connection {}", manager.connection_id());
        Ok(Arc::new(manager))
    }
}
