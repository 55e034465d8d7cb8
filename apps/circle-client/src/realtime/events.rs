//! Broadcast hub that lets UI layers observe the manager.
//!
//! One `tokio::sync::broadcast` channel. Each observer holds its own receiver,
//! and slow observers skip events (`RecvError::Lagged`) instead of stalling
//! the connection task.

use circle_common::{ConversationId, NotificationPayload};
use tokio::sync::broadcast;

use super::state::ConnectionState;

/// Capacity of the broadcast channel.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    StateChanged(ConnectionState),
    /// A non-message notification was added to the list.
    Notification(NotificationPayload),
    /// A chat message notification bumped the message counter.
    MessageNotification {
        conversation_id: Option<ConversationId>,
    },
    NotificationsCleared,
    MessagesCountCleared,
}

#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<RealtimeEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: RealtimeEvent) {
        // Fails only when nobody is listening.
        let _ = self.sender.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
