#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::time;

use circle_client::config::RealtimeConfig;
use circle_client::credentials::TokenSource;
use circle_client::error::CredentialError;
use circle_client::realtime::{ConnectionState, Notifier, RealtimeEvent, RealtimeManager, Toast};
use circle_client::stomp::{decode_all, Command, Frame, NOTIFICATION_FEED, NOTIFICATION_SUBSCRIPTION_ID};
use circle_client::transport::{MemoryBroker, MemoryPeer, MemoryTransport};

/// Generous upper bound for anything a test waits on (virtual time when the
/// clock is paused).
pub const WAIT: Duration = Duration::from_secs(4 * 60 * 60);

// ---------------------------------------------------------------------------
// Token sources
// ---------------------------------------------------------------------------

/// Hands out `token-1`, `token-2`, ... and counts calls. A script of leading
/// answers (e.g. "signed out") can be queued before that.
#[derive(Default)]
pub struct TestTokens {
    calls: AtomicUsize,
    script: Mutex<VecDeque<Option<String>>>,
}

impl TestTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: impl IntoIterator<Item = Option<&'static str>>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(script.into_iter().map(|t| t.map(str::to_string)).collect()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for TestTokens {
    async fn token(&self, _skip_cache: bool) -> Result<Option<String>, CredentialError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(scripted) = self.script.lock().pop_front() {
            return Ok(scripted);
        }
        Ok(Some(format!("token-{n}")))
    }
}

/// A token source whose fetch blocks until released.
#[derive(Default)]
pub struct GatedTokens {
    pub called: Notify,
    pub release: Notify,
    calls: AtomicUsize,
}

impl GatedTokens {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for GatedTokens {
    async fn token(&self, _skip_cache: bool) -> Result<Option<String>, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called.notify_one();
        self.release.notified().await;
        Ok(Some("late-token".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    toasts: Mutex<Vec<Toast>>,
}

impl RecordingNotifier {
    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, toast: &Toast) {
        self.toasts.lock().push(toast.clone());
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub manager: RealtimeManager,
    pub transport: Arc<MemoryTransport>,
    pub broker: MemoryBroker,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_config(RealtimeConfig::default(), tokens)
    }

    pub fn with_config(config: RealtimeConfig, tokens: Arc<dyn TokenSource>) -> Self {
        let (transport, broker) = MemoryTransport::pair();
        let transport = Arc::new(transport);
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = RealtimeManager::with_notifier(
            config,
            transport.clone(),
            tokens,
            notifier.clone(),
        );
        Self {
            manager,
            transport,
            broker,
            notifier,
        }
    }

    /// Accept the next link and complete the handshake without heart-beats.
    /// Returns the peer (feed SUBSCRIBE already consumed) and the CONNECT frame.
    pub async fn accept_connected(&mut self) -> (MemoryPeer, Frame) {
        self.accept_with_heart_beat("0,0").await
    }

    pub async fn accept_with_heart_beat(&mut self, heart_beat: &str) -> (MemoryPeer, Frame) {
        let mut peer = time::timeout(WAIT, self.broker.accept())
            .await
            .expect("timeout waiting for connection")
            .expect("transport dropped");
        let connect = next_frame(&mut peer).await;
        assert_eq!(connect.command, Command::Connect);
        peer.send(connected(heart_beat));

        let feed = next_frame(&mut peer).await;
        assert_eq!(feed.command, Command::Subscribe);
        assert_eq!(feed.header("id"), Some(NOTIFICATION_SUBSCRIPTION_ID));
        assert_eq!(feed.header("destination"), Some(NOTIFICATION_FEED));
        (peer, connect)
    }

    pub async fn wait_for_state(&self, state: ConnectionState) {
        wait_for_state(&self.manager, state).await;
    }
}

pub async fn wait_for_state(manager: &RealtimeManager, state: ConnectionState) {
    let mut rx = manager.state_watch();
    time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timeout waiting for {state}"))
        .expect("state channel closed");
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Next non-heartbeat frame the client sent.
pub async fn next_frame(peer: &mut MemoryPeer) -> Frame {
    loop {
        let text = time::timeout(WAIT, peer.recv())
            .await
            .expect("timeout waiting for frame")
            .expect("client closed the link");
        if let Some(frame) = decode_all(&text).into_iter().next() {
            return frame.expect("client sent a malformed frame");
        }
    }
}

pub fn connected(heart_beat: &str) -> String {
    Frame::new(Command::Connected)
        .with_header("version", "1.2")
        .with_header("heart-beat", heart_beat)
        .encode()
}

pub fn message(subscription_id: &str, destination: &str, body: &str) -> String {
    Frame::new(Command::Message)
        .with_header("subscription", subscription_id)
        .with_header("destination", destination)
        .with_header("message-id", "m-1")
        .with_header("content-type", "application/json")
        .with_body(body)
        .encode()
}

pub fn notification(body: &serde_json::Value) -> String {
    message(NOTIFICATION_SUBSCRIPTION_ID, NOTIFICATION_FEED, &body.to_string())
}

/// Next inbox event, skipping state changes.
pub async fn next_inbox_event(events: &mut broadcast::Receiver<RealtimeEvent>) -> RealtimeEvent {
    loop {
        let event = time::timeout(WAIT, events.recv())
            .await
            .expect("timeout waiting for event")
            .expect("event channel closed");
        if !matches!(event, RealtimeEvent::StateChanged(_)) {
            return event;
        }
    }
}
