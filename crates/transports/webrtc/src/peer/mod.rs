//! Peer connection management

pub mod connection;

pub use connection::{build_api, rtc_configuration, PeerConnectionManager};

use crate::media::{InboundReceiver, OutboundTrack};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, connection not yet started
    New,
    /// Connection negotiation in progress
    Connecting,
    /// Connection established successfully
    Connected,
    /// Connectivity temporarily lost; may recover
    Disconnected,
    /// Connection failed
    Failed,
    /// Connection closed
    Closed,
}

impl ConnectionState {
    /// True when the connection can no longer carry media
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

/// The connection operations the relay loop and controller depend on
#[async_trait]
pub trait MediaConnection: Send + Sync {
    /// Connection identifier
    fn id(&self) -> &str;

    /// Active inbound audio receivers
    ///
    /// Empty right after negotiation, before client media flows. Returns
    /// [`crate::Error::ConnectionClosed`] once the connection is closed or
    /// failed.
    async fn inbound_receivers(&self) -> Result<Vec<Arc<dyn InboundReceiver>>>;

    /// Replace the attached outbound track with `track` in a single step
    async fn attach_outbound(&self, track: OutboundTrack) -> Result<()>;

    /// The outbound track currently attached
    fn outbound_track(&self) -> Option<OutboundTrack>;

    /// Stop all transceivers, then close the connection
    ///
    /// Closing an already-closed connection is a no-op.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
