//! Relay sessions
//!
//! A [`Session`] is one live conversation: its state machine, its
//! cancellation token and the connection it exclusively owns. Sessions are
//! created and driven by the [`SessionController`].

pub mod controller;

pub use controller::SessionController;

use crate::peer::MediaConnection;
use crate::relay::RelayStats;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, not yet started
    Idle,
    /// Offer/answer exchange in progress
    Negotiating,
    /// Relay loop running
    Active,
    /// Shutdown in progress
    Stopping,
    /// Resources released; terminal
    Stopped,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Negotiating)
                | (Negotiating, Active)
                | (Negotiating, Stopped)
                | (Active, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Stopped
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One live conversation
pub struct Session {
    id: SessionId,
    state: watch::Sender<SessionState>,
    history: Mutex<Vec<SessionState>>,
    cancel: CancellationToken,
    connection: Mutex<Option<Arc<dyn MediaConnection>>>,
    stats: Arc<RelayStats>,
    created_at: Instant,
}

impl Session {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            id: SessionId::new(),
            state,
            history: Mutex::new(vec![SessionState::Idle]),
            cancel: CancellationToken::new(),
            connection: Mutex::new(None),
            stats: Arc::new(RelayStats::default()),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Every state this session has been in, oldest first
    pub fn history(&self) -> Vec<SessionState> {
        self.history.lock().clone()
    }

    /// Counters of this session's relay loop
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// The connection, while the session owns one
    pub fn connection(&self) -> Option<Arc<dyn MediaConnection>> {
        self.connection.lock().clone()
    }

    /// Wait until the session reaches `target`, up to `limit`
    pub async fn wait_for(&self, target: SessionState, limit: Duration) -> bool {
        let mut rx = self.subscribe();
        tokio::time::timeout(limit, rx.wait_for(|state| *state == target))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Move to `next` if the transition is legal
    ///
    /// Returns false, leaving the state untouched, otherwise.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let mut from = None;
        let moved = self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                from = Some(*current);
                *current = next;
                self.history.lock().push(next);
                true
            } else {
                false
            }
        });

        if let Some(from) = from {
            debug!("Session {} state transition: {} -> {}", self.id, from, next);
        }
        moved
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn set_connection(&self, connection: Arc<dyn MediaConnection>) {
        *self.connection.lock() = Some(connection);
    }

    pub(crate) fn take_connection(&self) -> Option<Arc<dyn MediaConnection>> {
        self.connection.lock().take()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
