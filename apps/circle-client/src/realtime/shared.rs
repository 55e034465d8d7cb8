//! State shared between the manager handle and its connection task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use circle_common::{ChatMessage, ConversationId, NotificationPayload};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::events::{EventHub, RealtimeEvent};
use super::inbox::Inbox;
use super::registry::SubscriptionRegistry;
use super::state::ConnectionState;
use super::toast::Notifier;

/// Requests from the handle to the connection task.
#[derive(Debug)]
pub(crate) enum Control {
    Subscribe {
        conversation_id: ConversationId,
        subscription_id: String,
        destination: String,
    },
    Unsubscribe {
        subscription_id: String,
    },
    Reconnect,
    Shutdown,
}

pub(crate) struct Shared {
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) inbox: Mutex<Inbox>,
    pub(crate) current_view: Mutex<Option<ConversationId>>,
    pub(crate) events: EventHub,
    state: watch::Sender<ConnectionState>,
    notifier: Arc<dyn Notifier>,
    /// Bumped on every start and stop. A connection task only touches shared
    /// state while its own generation is current.
    generation: AtomicU64,
}

impl Shared {
    pub(crate) fn new(notifier: Arc<dyn Notifier>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            registry: SubscriptionRegistry::new(),
            inbox: Mutex::new(Inbox::new()),
            current_view: Mutex::new(None),
            events: EventHub::new(),
            state,
            notifier,
            generation: AtomicU64::new(0),
        }
    }

    /// Open a new generation for a freshly spawned connection task.
    pub(crate) fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Invalidate the running connection task, if any. Returns the
    /// generation that marks "stopped" until the next `begin`.
    pub(crate) fn retire(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Transition on behalf of a connection task. Returns `false` (and does
    /// nothing) when that task has been retired.
    pub(crate) fn set_state(&self, generation: u64, state: ConnectionState) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.publish_state(state);
        true
    }

    pub(crate) fn publish_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::debug!(%state, "realtime state changed");
            self.events.publish(RealtimeEvent::StateChanged(state));
        }
    }

    /// Handle a frame body from the private notification feed.
    pub(crate) fn deliver_notification(&self, generation: u64, body: &str) {
        if !self.is_current(generation) {
            return;
        }
        let notification: NotificationPayload = match serde_json::from_str(body) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed notification frame");
                return;
            }
        };
        tracing::debug!(kind = %notification.kind, "notification received");

        let view = *self.current_view.lock();
        let delivery = self.inbox.lock().receive(notification, view);
        self.events.publish(delivery.event);
        if let Some(toast) = delivery.toast {
            self.notifier.notify(&toast);
        }
    }

    /// Handle a frame body from a conversation topic.
    pub(crate) fn deliver_message(
        &self,
        generation: u64,
        conversation_id: ConversationId,
        subscription_id: &str,
        body: &str,
    ) {
        if !self.is_current(generation) {
            return;
        }
        let Some(callback) = self.registry.callback_for(conversation_id, subscription_id) else {
            tracing::debug!(
                conversation_id,
                subscription_id,
                "dropping frame for superseded subscription"
            );
            return;
        };
        let message: ChatMessage = match serde_json::from_str(body) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "dropping malformed chat frame");
                return;
            }
        };
        tracing::debug!(conversation_id, message_id = message.id, "chat message received");
        callback(message);
    }
}
