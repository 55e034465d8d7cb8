//! The background task that owns the broker connection.
//!
//! One task per running manager. It fetches a token, opens a link, performs
//! the STOMP handshake, serves frames, timers and control requests from a
//! single `select!` loop, and schedules reconnects. Every write to shared
//! state is gated on the task's generation, so a stopped manager never hears
//! from it again.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use circle_common::id::{PrefixedId, SessionId};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};

use super::shared::{Control, Shared};
use super::state::ConnectionState;
use crate::config::RealtimeConfig;
use crate::credentials::TokenSource;
use crate::error::RealtimeError;
use crate::stomp::{
    decode_all, parse_conversation_topic, Command, Frame, HeartBeat, NOTIFICATION_FEED,
    NOTIFICATION_SUBSCRIPTION_ID,
};
use crate::transport::{Link, Transport, TransportEvent};

/// Stand-in deadline for timers that are switched off.
const IDLE: Duration = Duration::from_secs(24 * 60 * 60);

/// Why a connection attempt or session ended.
enum Exit {
    /// `stop()` was called or the manager was dropped.
    Shutdown,
    /// Start over right away (token refresh or explicit `connect()`).
    Reconnect,
    /// Start over after the reconnect delay.
    Failed(RealtimeError),
}

/// A link that completed the STOMP handshake.
struct Session {
    /// Client-side id, only used to tell attempts apart in logs.
    id: String,
    link: Link,
    send_every: Option<Duration>,
    expect_every: Option<Duration>,
    /// Subscription ids SUBSCRIBEd on this link.
    active: HashSet<String>,
}

impl Session {
    fn send(&self, frame: &Frame) -> Result<(), RealtimeError> {
        Ok(self.link.send(frame.encode())?)
    }

    fn subscribe(&mut self, id: &str, destination: &str) -> Result<(), RealtimeError> {
        if !self.active.insert(id.to_string()) {
            return Ok(());
        }
        tracing::debug!(subscription_id = id, destination, "SUBSCRIBE");
        self.send(&Frame::subscribe(id, destination))
    }

    fn unsubscribe(&mut self, id: &str) -> Result<(), RealtimeError> {
        if !self.active.remove(id) {
            return Ok(());
        }
        tracing::debug!(subscription_id = id, "UNSUBSCRIBE");
        self.send(&Frame::unsubscribe(id))
    }
}

pub(crate) struct ConnectionTask {
    shared: Arc<Shared>,
    generation: u64,
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
    control: mpsc::UnboundedReceiver<Control>,
}

impl ConnectionTask {
    pub(crate) fn new(
        shared: Arc<Shared>,
        generation: u64,
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenSource>,
        control: mpsc::UnboundedReceiver<Control>,
    ) -> Self {
        Self {
            shared,
            generation,
            config,
            transport,
            tokens,
            control,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut failures: u32 = 0;
        loop {
            if !self.shared.set_state(self.generation, ConnectionState::Connecting) {
                return;
            }
            let exit = match self.establish().await {
                Ok(session) => {
                    failures = 0;
                    self.serve(session).await
                }
                Err(exit) => exit,
            };

            match exit {
                Exit::Shutdown => {
                    tracing::debug!("realtime connection task stopped");
                    return;
                }
                Exit::Reconnect => continue,
                Exit::Failed(error) => {
                    if !self.shared.set_state(self.generation, ConnectionState::Failed) {
                        return;
                    }
                    let delay = self.config.reconnect_delay_for(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        %error,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "realtime connection failed, reconnecting"
                    );
                    // A `connect()` during the wait skips the rest of it.
                    if let Err(Exit::Shutdown) = interruptible(&mut self.control, sleep(delay)).await
                    {
                        return;
                    }
                }
            }
        }
    }

    /// Token, link, CONNECT, CONNECTED.
    async fn establish(&mut self) -> Result<Session, Exit> {
        let token = match interruptible(&mut self.control, self.tokens.token(true)).await? {
            Ok(Some(token)) => token,
            Ok(None) => return Err(Exit::Failed(RealtimeError::NoCredential)),
            Err(e) => return Err(Exit::Failed(e.into())),
        };
        if !self.shared.is_current(self.generation) {
            return Err(Exit::Shutdown);
        }

        let session_id = SessionId::generate();
        tracing::debug!(session = %session_id, "opening transport");
        let mut link = interruptible(&mut self.control, self.transport.open())
            .await?
            .map_err(|e| Exit::Failed(e.into()))?;

        let requested = HeartBeat::symmetric(self.config.heartbeat);
        if let Err(e) = link.send(Frame::connect(&token, requested).encode()) {
            return Err(Exit::Failed(e.into()));
        }

        let deadline = Instant::now() + self.config.handshake_timeout;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    link.close().await;
                    return Err(Exit::Failed(RealtimeError::HandshakeTimeout));
                }
                ctl = self.control.recv() => match ctl {
                    None | Some(Control::Shutdown) => {
                        link.close().await;
                        return Err(Exit::Shutdown);
                    }
                    Some(Control::Reconnect) => {
                        link.close().await;
                        return Err(Exit::Reconnect);
                    }
                    // Registry entries are picked up once CONNECTED arrives.
                    Some(Control::Subscribe { .. } | Control::Unsubscribe { .. }) => {}
                },
                event = link.recv() => match event {
                    TransportEvent::Message(text) => {
                        for frame in decode_all(&text) {
                            match frame {
                                Ok(frame) if frame.command == Command::Connected => {
                                    let server = frame
                                        .header("heart-beat")
                                        .map(HeartBeat::parse)
                                        .unwrap_or_default();
                                    let (send_every, expect_every) = requested.negotiate(server);
                                    tracing::debug!(
                                        version = frame.header("version").unwrap_or("1.0"),
                                        ?send_every,
                                        ?expect_every,
                                        "stomp CONNECTED"
                                    );
                                    return Ok(Session {
                                        id: session_id,
                                        link,
                                        send_every,
                                        expect_every,
                                        active: HashSet::new(),
                                    });
                                }
                                Ok(frame) if frame.command == Command::Error => {
                                    link.close().await;
                                    return Err(Exit::Failed(broker_error(&frame)));
                                }
                                Ok(frame) => {
                                    tracing::debug!(command = %frame.command, "ignoring frame before CONNECTED");
                                }
                                Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
                            }
                        }
                    }
                    TransportEvent::Closed { code, reason } => {
                        return Err(Exit::Failed(RealtimeError::Closed { code, reason }));
                    }
                },
            }
        }
    }

    /// Run a connected session, then deactivate its link.
    async fn serve(&mut self, mut session: Session) -> Exit {
        let exit = self.run_session(&mut session).await;
        if matches!(exit, Exit::Shutdown | Exit::Reconnect) {
            let _ = session.send(&Frame::disconnect());
        }
        session.link.close().await;
        exit
    }

    async fn run_session(&mut self, session: &mut Session) -> Exit {
        if let Err(e) = session.subscribe(NOTIFICATION_SUBSCRIPTION_ID, NOTIFICATION_FEED) {
            return Exit::Failed(e);
        }
        for (subscription_id, destination) in self.shared.registry.snapshot() {
            if let Err(e) = session.subscribe(&subscription_id, &destination) {
                return Exit::Failed(e);
            }
        }
        if !self.shared.set_state(self.generation, ConnectionState::Connected) {
            return Exit::Shutdown;
        }
        tracing::info!(
            session = %session.id,
            conversations = session.active.len() - 1,
            "realtime connected"
        );

        let refresh_at = Instant::now() + self.config.token_refresh_interval;
        let mut last_sent = Instant::now();
        let mut last_heard = Instant::now();

        loop {
            let send_at = last_sent + session.send_every.unwrap_or(IDLE);
            let dead_at = last_heard + session.expect_every.map_or(IDLE, |d| d * 2);

            tokio::select! {
                _ = sleep_until(refresh_at) => {
                    tracing::info!("token refresh due, reconnecting");
                    return Exit::Reconnect;
                }
                _ = sleep_until(send_at), if session.send_every.is_some() => {
                    if let Err(e) = session.link.send("\n".to_string()) {
                        return Exit::Failed(e.into());
                    }
                    last_sent = Instant::now();
                }
                _ = sleep_until(dead_at), if session.expect_every.is_some() => {
                    return Exit::Failed(RealtimeError::HeartbeatTimeout);
                }
                ctl = self.control.recv() => {
                    let sent = match ctl {
                        None | Some(Control::Shutdown) => return Exit::Shutdown,
                        Some(Control::Reconnect) => {
                            tracing::info!("reconnect requested");
                            return Exit::Reconnect;
                        }
                        Some(Control::Subscribe { conversation_id, subscription_id, destination }) => {
                            // A newer subscribe for the same conversation may already be queued.
                            if self.shared.registry.is_current(conversation_id, &subscription_id) {
                                session.subscribe(&subscription_id, &destination)
                            } else {
                                Ok(())
                            }
                        }
                        Some(Control::Unsubscribe { subscription_id }) => {
                            session.unsubscribe(&subscription_id)
                        }
                    };
                    if let Err(e) = sent {
                        return Exit::Failed(e);
                    }
                    last_sent = Instant::now();
                }
                event = session.link.recv() => {
                    last_heard = Instant::now();
                    match event {
                        TransportEvent::Message(text) => {
                            if let Some(exit) = self.dispatch(&text) {
                                return exit;
                            }
                        }
                        TransportEvent::Closed { code, reason } => {
                            return Exit::Failed(RealtimeError::Closed { code, reason });
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) -> Option<Exit> {
        for frame in decode_all(text) {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed frame");
                    continue;
                }
            };
            match frame.command {
                Command::Message => self.on_message(&frame),
                Command::Error => return Some(Exit::Failed(broker_error(&frame))),
                Command::Receipt => {
                    tracing::debug!(receipt_id = frame.header("receipt-id"), "stomp RECEIPT");
                }
                other => tracing::debug!(command = %other, "ignoring unexpected frame"),
            }
        }
        None
    }

    fn on_message(&self, frame: &Frame) {
        let subscription_id = frame.header("subscription").unwrap_or_default();
        if subscription_id == NOTIFICATION_SUBSCRIPTION_ID {
            self.shared.deliver_notification(self.generation, &frame.body);
            return;
        }
        let Some(conversation_id) = frame.header("destination").and_then(parse_conversation_topic)
        else {
            tracing::debug!(
                subscription_id,
                destination = frame.header("destination"),
                "MESSAGE for unknown destination"
            );
            return;
        };
        self.shared
            .deliver_message(self.generation, conversation_id, subscription_id, &frame.body);
    }
}

/// Await `fut` while still answering control requests.
///
/// Shutdown and reconnect requests abandon the future. Subscription changes
/// need no action here because the registry is replayed on connect.
async fn interruptible<F: Future>(
    control: &mut mpsc::UnboundedReceiver<Control>,
    fut: F,
) -> Result<F::Output, Exit> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Ok(out),
            ctl = control.recv() => match ctl {
                None | Some(Control::Shutdown) => return Err(Exit::Shutdown),
                Some(Control::Reconnect) => return Err(Exit::Reconnect),
                Some(Control::Subscribe { .. } | Control::Unsubscribe { .. }) => {}
            },
        }
    }
}

fn broker_error(frame: &Frame) -> RealtimeError {
    let message = frame
        .header("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.trim_end_matches('\0').trim().to_string());
    RealtimeError::Broker(message)
}
