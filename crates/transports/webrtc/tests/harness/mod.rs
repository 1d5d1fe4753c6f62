//! In-memory relay test harness
//!
//! Fakes for every seam the relay loop and controller depend on:
//!
//! - [`FakeConnection`]: a `MediaConnection` with scripted receivers, a
//!   recorded outbound track history and switches for loss and stalls
//! - [`FakeReceiver`]: frames pushed by the test through a channel
//! - [`FakeSpeechClient`]: scripted replies, gated replies and hangs
//! - [`FakeNegotiator`]: hands out a prepared connection, optionally slowly
//!
//! Basic usage pattern:
//!
//! 1. Build a `FakeConnection` and attach `FakeReceiver`s to it
//! 2. Build a `FakeSpeechClient` with the replies the test expects
//! 3. Drive an `AudioRelayLoop` or a `SessionController` with them
//! 4. Push frames and assert on the recorded calls and tracks

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use voicerelay_core::{AudioFrame, SpeechClient};
use voicerelay_webrtc::{
    Error, InboundReceiver, MediaConnection, Negotiator, OutboundTrack, RelayConfig, Result,
};

/// Initialize tracing for tests (call once per test)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug,webrtc=warn")
        .with_test_writer()
        .try_init();
}

/// Short timings so tests run in milliseconds
pub fn fast_config() -> RelayConfig {
    RelayConfig {
        receiver_poll_interval_ms: 10,
        frame_read_timeout_ms: 200,
        iteration_delay_ms: 1,
        shutdown_grace_ms: 500,
        negotiation_timeout_ms: 2_000,
        ..Default::default()
    }
}

/// A frame of `len` bytes all equal to `fill`
pub fn frame(len: usize, fill: u8) -> AudioFrame {
    AudioFrame::new(Bytes::from(vec![fill; len]), 48_000, 1, 0)
}

/// Poll `condition` every few milliseconds until it holds or `limit` passes
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// =============================================================================
// Receiver
// =============================================================================

/// Inbound receiver fed by the test
pub struct FakeReceiver {
    id: String,
    frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<AudioFrame>>,
    reads: AtomicUsize,
}

/// Test-side handle for pushing frames into a [`FakeReceiver`]
#[derive(Clone)]
pub struct FramePusher(mpsc::UnboundedSender<AudioFrame>);

impl FramePusher {
    pub fn push(&self, frame: AudioFrame) {
        let _ = self.0.send(frame);
    }
}

impl FakeReceiver {
    pub fn new(id: &str) -> (Arc<Self>, FramePusher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let receiver = Arc::new(Self {
            id: id.to_string(),
            frames: tokio::sync::Mutex::new(rx),
            reads: AtomicUsize::new(0),
        });
        (receiver, FramePusher(tx))
    }

    /// Frames handed to the relay so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InboundReceiver for FakeReceiver {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read_frame(&self) -> Result<AudioFrame> {
        let mut frames = self.frames.lock().await;
        match frames.recv().await {
            Some(frame) => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                Ok(frame)
            }
            None => Err(Error::MediaTrackError(format!("{} ended", self.id))),
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// In-memory media connection
pub struct FakeConnection {
    id: String,
    receivers: Mutex<Vec<Arc<dyn InboundReceiver>>>,
    receiver_calls: AtomicUsize,
    outbound: Mutex<Option<OutboundTrack>>,
    attached: Mutex<Vec<OutboundTrack>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    lost: AtomicBool,
    stall_attach: AtomicBool,
    fail_close: AtomicBool,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: format!("fake-{}", uuid::Uuid::new_v4()),
            receivers: Mutex::new(Vec::new()),
            receiver_calls: AtomicUsize::new(0),
            outbound: Mutex::new(Some(OutboundTrack::placeholder())),
            attached: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            lost: AtomicBool::new(false),
            stall_attach: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        })
    }

    /// Connection with one receiver already attached
    pub fn with_receiver() -> (Arc<Self>, Arc<FakeReceiver>, FramePusher) {
        let connection = Self::new();
        let (receiver, pusher) = FakeReceiver::new("mic");
        connection.add_receiver(receiver.clone());
        (connection, receiver, pusher)
    }

    pub fn add_receiver(&self, receiver: Arc<dyn InboundReceiver>) {
        self.receivers.lock().push(receiver);
    }

    /// Make `inbound_receivers` report the connection as gone
    pub fn lose(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    /// Make every `attach_outbound` hang forever
    pub fn stall_attach(&self) {
        self.stall_attach.store(true, Ordering::SeqCst);
    }

    /// Make `close` report a cleanup failure
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn receiver_calls(&self) -> usize {
        self.receiver_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Every track attached after the placeholder, in order
    pub fn attached(&self) -> Vec<OutboundTrack> {
        self.attached.lock().clone()
    }
}

#[async_trait]
impl MediaConnection for FakeConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn inbound_receivers(&self) -> Result<Vec<Arc<dyn InboundReceiver>>> {
        self.receiver_calls.fetch_add(1, Ordering::SeqCst);
        if self.lost.load(Ordering::SeqCst) || self.is_closed() {
            return Err(Error::ConnectionClosed(format!("{} is gone", self.id)));
        }
        Ok(self.receivers.lock().clone())
    }

    async fn attach_outbound(&self, track: OutboundTrack) -> Result<()> {
        if self.stall_attach.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.is_closed() {
            return Err(Error::ConnectionClosed(format!("{} is closed", self.id)));
        }
        *self.outbound.lock() = Some(track.clone());
        self.attached.lock().push(track);
        Ok(())
    }

    fn outbound_track(&self) -> Option<OutboundTrack> {
        self.outbound.lock().clone()
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::ResourceCleanupError(
                "transceiver stop failed".to_string(),
            ));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Speech client
// =============================================================================

/// One scripted speech reply
#[derive(Clone)]
pub enum Reply {
    /// Respond immediately
    Audio(Bytes),
    /// Respond once the test calls [`FakeSpeechClient::release`]
    Gated(Bytes),
    /// Fail with a 503
    Unavailable,
    /// Never return, ignoring cancellation
    Hang,
}

/// Speech client replaying a script, then a default reply
pub struct FakeSpeechClient {
    script: Mutex<VecDeque<Reply>>,
    default: Reply,
    gate: Semaphore,
    payloads: Mutex<Vec<Bytes>>,
    calls: AtomicUsize,
}

impl FakeSpeechClient {
    pub fn new(default: Reply) -> Arc<Self> {
        Self::scripted(Vec::new(), default)
    }

    pub fn scripted(script: Vec<Reply>, default: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            default,
            gate: Semaphore::new(0),
            payloads: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Always answer with `len` bytes of `fill`
    pub fn responding(len: usize, fill: u8) -> Arc<Self> {
        Self::new(Reply::Audio(Bytes::from(vec![fill; len])))
    }

    /// Let one gated reply through
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payloads received, in call order
    pub fn payloads(&self) -> Vec<Bytes> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl SpeechClient for FakeSpeechClient {
    async fn send_audio(
        &self,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> voicerelay_core::Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().push(payload);

        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        match reply {
            Reply::Audio(audio) => Ok(audio),
            Reply::Gated(audio) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(voicerelay_core::Error::Cancelled),
                    permit = self.gate.acquire() => {
                        permit.expect("gate closed").forget();
                        Ok(audio)
                    }
                }
            }
            Reply::Unavailable => Err(voicerelay_core::Error::RemoteUnavailable {
                status: Some(503),
                reason: "Service Unavailable".to_string(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// =============================================================================
// Negotiator
// =============================================================================

/// Negotiator handing out prepared connections
pub struct FakeNegotiator {
    connections: Mutex<VecDeque<Arc<FakeConnection>>>,
    delay: Duration,
    fail: AtomicBool,
    ignore_cancel: AtomicBool,
    calls: AtomicUsize,
    cancelled: AtomicUsize,
}

impl FakeNegotiator {
    pub fn new(connections: Vec<Arc<FakeConnection>>) -> Arc<Self> {
        Self::delayed(connections, Duration::ZERO)
    }

    /// Takes `delay` to negotiate, abandoning the attempt when cancelled
    pub fn delayed(connections: Vec<Arc<FakeConnection>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(connections.into()),
            delay,
            fail: AtomicBool::new(false),
            ignore_cancel: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        })
    }

    /// Takes `delay` to negotiate and never looks at the cancellation token
    pub fn stubborn(connections: Vec<Arc<FakeConnection>>, delay: Duration) -> Arc<Self> {
        let negotiator = Self::delayed(connections, delay);
        negotiator.ignore_cancel.store(true, Ordering::SeqCst);
        negotiator
    }

    /// Negotiator whose exchange always fails
    pub fn failing() -> Arc<Self> {
        let negotiator = Self::new(Vec::new());
        negotiator.fail.store(true, Ordering::SeqCst);
        negotiator
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Negotiations abandoned because of cancellation
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Negotiator for FakeNegotiator {
    async fn negotiate(&self, cancel: &CancellationToken) -> Result<Arc<dyn MediaConnection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::NegotiationError(
                "simulated transport error during offer/answer".to_string(),
            ));
        }

        let connection = self
            .connections
            .lock()
            .pop_front()
            .ok_or_else(|| Error::NegotiationError("no connection prepared".to_string()))?;

        if self.ignore_cancel.load(Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    let _ = connection.close().await;
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        Ok(connection as Arc<dyn MediaConnection>)
    }
}
