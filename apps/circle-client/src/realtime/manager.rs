//! Public handle of the realtime connection manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use circle_common::id::{PrefixedId, SubscriptionId};
use circle_common::{ChatMessage, ConversationId, NotificationPayload};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::connection::ConnectionTask;
use super::events::RealtimeEvent;
use super::registry::SubscriptionEntry;
use super::shared::{Control, Shared};
use super::state::ConnectionState;
use super::toast::{LogNotifier, Notifier};
use crate::config::RealtimeConfig;
use crate::credentials::TokenSource;
use crate::stomp::conversation_topic;
use crate::transport::Transport;

/// How long `stop()` waits for the connection task to say DISCONNECT.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// The running connection task and its control channel.
struct Running {
    control: mpsc::UnboundedSender<Control>,
    handle: JoinHandle<()>,
}

/// One authenticated broker connection per signed-in session.
///
/// Cheap to share behind an `Arc`. All operations are infallible from the
/// caller's point of view: connection problems are logged and retried in
/// the background.
pub struct RealtimeManager {
    shared: Arc<Shared>,
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
    running: Mutex<Option<Running>>,
}

impl RealtimeManager {
    pub fn new(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self::with_notifier(config, transport, tokens, Arc::new(LogNotifier))
    }

    pub fn with_notifier(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(notifier)),
            config,
            transport,
            tokens,
            running: Mutex::new(None),
        }
    }

    /// Spawn the connection task unless it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }
        let generation = self.shared.begin();
        let (control, rx) = mpsc::unbounded_channel();
        let task = ConnectionTask::new(
            self.shared.clone(),
            generation,
            self.config.clone(),
            self.transport.clone(),
            self.tokens.clone(),
            rx,
        );
        self.shared.publish_state(ConnectionState::Connecting);
        tracing::info!(generation, "starting realtime connection");
        *running = Some(Running {
            control,
            handle: tokio::spawn(task.run()),
        });
    }

    /// Drop the current transport (if any) and attempt a new connection with
    /// a fresh token. Starts the manager when it is not running.
    pub fn connect(&self) {
        let sent = self
            .running
            .lock()
            .as_ref()
            .is_some_and(|r| r.control.send(Control::Reconnect).is_ok());
        if !sent {
            self.start();
        }
    }

    /// Tear everything down.
    ///
    /// Once this returns no timer fires and no callback runs, even for a
    /// token fetch or frame that completes later.
    ///
    /// A `start()` racing with this call wins: its task, subscriptions and
    /// state are left alone.
    pub async fn stop(&self) {
        let (stopped, running) = {
            let mut running = self.running.lock();
            let stopped = self.shared.retire();
            let cancelled = self.shared.registry.clear();
            tracing::info!(cancelled, "stopping realtime connection");
            (stopped, running.take())
        };
        if let Some(Running { control, mut handle }) = running {
            let _ = control.send(Control::Shutdown);
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                tracing::warn!("realtime connection task did not stop in time, aborting");
                handle.abort();
            }
        }
        // Same lock as `start()`, so a restart cannot slip in between.
        let _running = self.running.lock();
        if !self.shared.is_current(stopped) {
            tracing::debug!("restarted while stopping");
            return;
        }
        self.shared.publish_state(ConnectionState::Disconnected);
        tracing::info!("realtime connection stopped");
    }

    /// Follow chat messages of one conversation.
    ///
    /// Only valid while connected; otherwise a warning is logged and the
    /// returned subscription does nothing. Replaces any earlier subscription
    /// for the same conversation.
    pub fn subscribe_to_connection<F>(
        &self,
        conversation_id: ConversationId,
        on_message: F,
    ) -> Subscription
    where
        F: Fn(ChatMessage) + Send + Sync + 'static,
    {
        let control = match self.running.lock().as_ref() {
            Some(r) if self.shared.state() == ConnectionState::Connected => r.control.clone(),
            _ => {
                tracing::warn!(conversation_id, "cannot subscribe while not connected");
                return Subscription::inert(conversation_id);
            }
        };

        let subscription_id = SubscriptionId::generate();
        let destination = conversation_topic(conversation_id);
        let previous = self.shared.registry.replace(
            conversation_id,
            SubscriptionEntry {
                subscription_id: subscription_id.clone(),
                destination: destination.clone(),
                callback: Arc::new(on_message),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(
                conversation_id,
                subscription_id = %previous.subscription_id,
                "replacing existing subscription"
            );
            let _ = control.send(Control::Unsubscribe {
                subscription_id: previous.subscription_id,
            });
        }
        let _ = control.send(Control::Subscribe {
            conversation_id,
            subscription_id: subscription_id.clone(),
            destination,
        });
        tracing::info!(conversation_id, %subscription_id, "subscribed to conversation");

        Subscription {
            conversation_id,
            subscription_id: Some(subscription_id),
            shared: Arc::downgrade(&self.shared),
            control: Some(control),
            done: AtomicBool::new(false),
        }
    }

    /// Tell the manager which conversation is on screen. Chat notifications
    /// for it are counted but not toasted.
    pub fn set_current_view(&self, conversation_id: Option<ConversationId>) {
        *self.shared.current_view.lock() = conversation_id;
    }

    pub fn clear_notifications(&self) {
        self.shared.inbox.lock().clear_notifications();
        self.shared.events.publish(RealtimeEvent::NotificationsCleared);
    }

    pub fn clear_messages_count(&self) {
        self.shared.inbox.lock().clear_messages_count();
        self.shared.events.publish(RealtimeEvent::MessagesCountCleared);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Live view of the connection state, e.g. for an online indicator.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.watch_state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Notifications received so far, newest first.
    pub fn notifications(&self) -> Vec<NotificationPayload> {
        self.shared.inbox.lock().notifications().to_vec()
    }

    pub fn unread_count(&self) -> u64 {
        self.shared.inbox.lock().unread_count()
    }

    pub fn unread_messages_count(&self) -> u64 {
        self.shared.inbox.lock().unread_messages_count()
    }

    pub fn events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for RealtimeManager {
    fn drop(&mut self) {
        self.shared.retire();
        if let Some(running) = self.running.get_mut().take() {
            running.handle.abort();
        }
    }
}

/// Handle for one conversation subscription.
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[must_use = "the subscription stays active until `unsubscribe` is called"]
pub struct Subscription {
    conversation_id: ConversationId,
    subscription_id: Option<String>,
    shared: Weak<Shared>,
    control: Option<mpsc::UnboundedSender<Control>>,
    done: AtomicBool,
}

impl Subscription {
    fn inert(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            subscription_id: None,
            shared: Weak::new(),
            control: None,
            done: AtomicBool::new(true),
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Broker subscription id, `None` for an inert subscription.
    pub fn id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    /// `false` once unsubscribed, replaced by a newer subscription, or
    /// cancelled by `stop()`.
    pub fn is_active(&self) -> bool {
        let (Some(id), Some(shared)) = (&self.subscription_id, self.shared.upgrade()) else {
            return false;
        };
        !self.done.load(Ordering::SeqCst) && shared.registry.is_current(self.conversation_id, id)
    }

    /// Stop receiving messages. Safe to call any number of times.
    ///
    /// Leaves a newer subscription for the same conversation untouched.
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let (Some(id), Some(shared)) = (&self.subscription_id, self.shared.upgrade()) else {
            return;
        };
        if !shared.registry.remove_if_current(self.conversation_id, id) {
            tracing::debug!(
                conversation_id = self.conversation_id,
                subscription_id = %id,
                "subscription already superseded"
            );
            return;
        }
        if let Some(control) = &self.control {
            let _ = control.send(Control::Unsubscribe {
                subscription_id: id.clone(),
            });
        }
        tracing::info!(conversation_id = self.conversation_id, subscription_id = %id, "unsubscribed");
    }
}
