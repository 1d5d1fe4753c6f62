//! Session controller
//!
//! Drives one session at a time through
//! `Idle -> Negotiating -> Active -> Stopping -> Stopped`.
//!
//! The relay task for each session is spawned on the runtime handle passed to
//! [`SessionController::new`] and recorded in a registry keyed by session id,
//! so stopping a session looks its task up directly. A relay loop that loses
//! its connection reports the session id to a reaper task, which stops the
//! session the same way an explicit [`SessionController::stop`] would.

use super::{Session, SessionId, SessionState};
use crate::config::RelayConfig;
use crate::peer::MediaConnection;
use crate::relay::{AudioRelayLoop, RelayExit};
use crate::signaling::Negotiator;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use voicerelay_core::SpeechClient;

/// Starts and stops relay sessions
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    runtime: Handle,
    negotiator: Arc<dyn Negotiator>,
    speech: Arc<dyn SpeechClient>,
    config: RelayConfig,

    /// Most recent session; replaced only once it is Stopped
    current: Mutex<Option<Arc<Session>>>,

    /// Relay task per session
    tasks: Mutex<HashMap<SessionId, JoinHandle<RelayExit>>>,

    /// Sessions whose relay loop lost its connection
    lost_tx: mpsc::UnboundedSender<SessionId>,
}

impl SessionController {
    /// Create a controller
    ///
    /// Relay tasks and the connection-loss reaper run on `runtime`.
    pub fn new(
        runtime: Handle,
        negotiator: Arc<dyn Negotiator>,
        speech: Arc<dyn SpeechClient>,
        config: RelayConfig,
    ) -> Self {
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ControllerInner {
            runtime: runtime.clone(),
            negotiator,
            speech,
            config,
            current: Mutex::new(None),
            tasks: Mutex::new(HashMap::new()),
            lost_tx,
        });

        runtime.spawn(reap_lost_sessions(Arc::downgrade(&inner), lost_rx));

        Self { inner }
    }

    /// Start a session
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyActive`] if a session is negotiating, active or stopping
    /// - [`Error::NegotiationError`] if the connection could not be negotiated
    /// - [`Error::Cancelled`] if [`stop`](Self::stop) was called during negotiation
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<SessionId> {
        let session = {
            let mut current = self.inner.current.lock();
            if let Some(existing) = current.as_ref() {
                let state = existing.state();
                if !state.is_terminal() {
                    return Err(Error::AlreadyActive(state));
                }
            }

            let session = Arc::new(Session::new());
            session.transition(SessionState::Negotiating);
            *current = Some(Arc::clone(&session));
            session
        };

        info!(session_id = %session.id(), "Starting session");

        let connection = match self.inner.negotiator.negotiate(session.cancellation()).await {
            Ok(connection) => connection,
            Err(e) if e.is_cancelled() || session.cancellation().is_cancelled() => {
                session.transition(SessionState::Stopped);
                info!(session_id = %session.id(), "Session stopped during negotiation");
                return Err(Error::Cancelled);
            }
            Err(e) => {
                session.transition(SessionState::Stopped);
                warn!(session_id = %session.id(), error = %e, "Session failed to start");
                return Err(match e {
                    Error::NegotiationError(_) => e,
                    other => Error::NegotiationError(other.to_string()),
                });
            }
        };

        let spawned = {
            let mut tasks = self.inner.tasks.lock();
            if session.cancellation().is_cancelled() {
                false
            } else {
                session.set_connection(Arc::clone(&connection));
                session.transition(SessionState::Active);

                let relay = AudioRelayLoop::new(
                    session.id(),
                    Arc::clone(&connection),
                    Arc::clone(&self.inner.speech),
                    session.cancellation().clone(),
                    &self.inner.config,
                )
                .with_stats(session.stats());

                let handle = self.inner.runtime.spawn(supervise(
                    relay,
                    Arc::clone(&session),
                    self.inner.lost_tx.clone(),
                ));
                tasks.insert(session.id(), handle);
                true
            }
        };

        if !spawned {
            info!(session_id = %session.id(), "Session stopped during negotiation");
            close_connection(session.id(), connection.as_ref(), self.inner.config.shutdown_grace())
                .await;
            session.transition(SessionState::Stopped);
            return Err(Error::Cancelled);
        }

        info!(
            session_id = %session.id(),
            connection_id = connection.id(),
            "Session active"
        );
        Ok(session.id())
    }

    /// Stop the current session
    ///
    /// A no-op when no session is running. Returns within the shutdown grace
    /// period plus the time to close the connection, even if the relay loop
    /// is stuck.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let session = self.inner.current.lock().clone();
        match session {
            Some(session) => self.inner.stop_session(session).await,
            None => Ok(()),
        }
    }

    /// Stop a session by id
    pub async fn stop_session(&self, id: SessionId) -> Result<()> {
        let session = self
            .inner
            .current
            .lock()
            .clone()
            .filter(|s| s.id() == id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        self.inner.stop_session(session).await
    }

    /// State of the current session (Idle if none was ever started)
    pub fn state(&self) -> SessionState {
        self.inner
            .current
            .lock()
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(SessionState::Idle)
    }

    /// The current session
    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.inner.current.lock().clone()
    }

    /// Relay tasks still registered
    pub fn active_relays(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }
}

impl ControllerInner {
    /// Stop a session whose negotiation is still running
    ///
    /// Negotiators abandon the exchange once the session is cancelled. One
    /// that does not is given the grace period, after which the session is
    /// forced to Stopped and `start()` closes the late connection itself.
    async fn stop_negotiating(&self, session: &Session, grace: Duration) -> Result<()> {
        let id = session.id();
        info!(session_id = %id, "Stopping session during negotiation");

        if !session.wait_for(SessionState::Stopped, grace).await
            && session.transition(SessionState::Stopped)
        {
            warn!(
                session_id = %id,
                grace_ms = grace.as_millis() as u64,
                "Negotiation did not yield within grace period, session forced to Stopped"
            );
        }
        Ok(())
    }

    async fn stop_session(&self, session: Arc<Session>) -> Result<()> {
        let grace = self.config.shutdown_grace();
        let id = session.id();

        let (negotiating, handle) = {
            let mut tasks = self.tasks.lock();
            match session.state() {
                SessionState::Idle | SessionState::Stopped => return Ok(()),
                SessionState::Negotiating => {
                    // start() closes any connection negotiation still returns
                    session.cancellation().cancel();
                    (true, None)
                }
                SessionState::Active => {
                    session.transition(SessionState::Stopping);
                    (false, tasks.remove(&id))
                }
                SessionState::Stopping => (false, tasks.remove(&id)),
            }
        };

        if negotiating {
            return self.stop_negotiating(&session, grace).await;
        }

        info!(session_id = %id, "Stopping session");

        let Some(mut handle) = handle else {
            // Another stop owns the relay task
            if !session.wait_for(SessionState::Stopped, grace).await {
                warn!(
                    session_id = %id,
                    state = %session.state(),
                    "Session not stopped within grace period"
                );
            }
            return Ok(());
        };

        session.cancellation().cancel();

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(exit)) => debug!(session_id = %id, ?exit, "Relay task finished"),
            Ok(Err(e)) => warn!(session_id = %id, error = %e, "Relay task panicked"),
            Err(_) => {
                handle.abort();
                warn!(
                    session_id = %id,
                    grace_ms = grace.as_millis() as u64,
                    "Relay task did not finish within grace period, aborted"
                );
            }
        }

        if let Some(connection) = session.take_connection() {
            close_connection(id, connection.as_ref(), grace).await;
        }

        session.transition(SessionState::Stopped);
        info!(session_id = %id, "Session stopped");
        Ok(())
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        let Some(session) = self.current.get_mut().take() else {
            return;
        };
        session.cancellation().cancel();

        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }

        // Best effort; stop() is the orderly path
        if let Some(connection) = session.take_connection() {
            let id = session.id();
            let grace = self.config.shutdown_grace();
            warn!(session_id = %id, "Controller dropped with a live session, closing connection");
            self.runtime.spawn(async move {
                close_connection(id, connection.as_ref(), grace).await;
                session.transition(SessionState::Stopping);
                session.transition(SessionState::Stopped);
            });
        }
    }
}

/// Close a connection, logging cleanup failures
async fn close_connection(id: SessionId, connection: &dyn MediaConnection, limit: Duration) {
    match tokio::time::timeout(limit, connection.close()).await {
        Ok(Ok(())) => debug!(session_id = %id, "Connection closed"),
        Ok(Err(e)) => warn!(session_id = %id, error = %e, "Connection cleanup failed"),
        Err(_) => warn!(session_id = %id, "Connection close timed out"),
    }
}

/// Run a relay loop, reporting connection loss
async fn supervise(
    relay: AudioRelayLoop,
    session: Arc<Session>,
    lost_tx: mpsc::UnboundedSender<SessionId>,
) -> RelayExit {
    let exit = relay.run().await;

    if let RelayExit::ConnectionLost(reason) = &exit {
        if session.transition(SessionState::Stopping) {
            warn!(session_id = %session.id(), %reason, "Relay connection lost, stopping session");
            let _ = lost_tx.send(session.id());
        }
    }

    exit
}

async fn reap_lost_sessions(
    inner: Weak<ControllerInner>,
    mut lost_rx: mpsc::UnboundedReceiver<SessionId>,
) {
    while let Some(id) = lost_rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        let session = inner.current.lock().clone().filter(|s| s.id() == id);
        if let Some(session) = session {
            if let Err(e) = inner.stop_session(session).await {
                warn!(session_id = %id, error = %e, "Failed to stop lost session");
            }
        }
    }
}
