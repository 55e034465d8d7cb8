//! Notification list and unread counters.

use circle_common::{ConversationId, NotificationPayload};

use super::events::RealtimeEvent;
use super::toast::Toast;

/// What one feed frame did to the inbox.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub event: RealtimeEvent,
    pub toast: Option<Toast>,
}

/// In-memory inbox. Newest notification first; nothing is persisted.
#[derive(Debug, Default)]
pub struct Inbox {
    notifications: Vec<NotificationPayload>,
    unread_count: u64,
    unread_messages_count: u64,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one feed notification.
    ///
    /// Chat messages only bump the message counter and never toast for the
    /// conversation currently on screen. Everything else is listed, counted
    /// and toasted.
    pub fn receive(
        &mut self,
        notification: NotificationPayload,
        current_view: Option<ConversationId>,
    ) -> Delivery {
        if notification.kind.is_chat_message() {
            self.unread_messages_count += 1;
            let conversation_id = notification.conversation_id();
            let toast = match conversation_id {
                Some(id) if current_view == Some(id) => None,
                Some(id) => Some(Toast::for_message(&notification, id)),
                None => Some(Toast::for_notification(&notification)),
            };
            return Delivery {
                event: RealtimeEvent::MessageNotification { conversation_id },
                toast,
            };
        }

        let toast = Toast::for_notification(&notification);
        self.notifications.insert(0, notification.clone());
        self.unread_count += 1;
        Delivery {
            event: RealtimeEvent::Notification(notification),
            toast: Some(toast),
        }
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
        self.unread_count = 0;
    }

    pub fn clear_messages_count(&mut self) {
        self.unread_messages_count = 0;
    }

    pub fn notifications(&self) -> &[NotificationPayload] {
        &self.notifications
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    pub fn unread_messages_count(&self) -> u64 {
        self.unread_messages_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::toast::Route;
    use serde_json::json;

    fn feed(value: serde_json::Value) -> NotificationPayload {
        serde_json::from_value(value).unwrap()
    }

    fn new_message(conversation: i64) -> NotificationPayload {
        feed(json!({
            "type": "NEW_MESSAGE",
            "entityId": 1000,
            "message": "New message from brave-heron",
            "data": { "connectionId": conversation, "content": "hi" }
        }))
    }

    #[test]
    fn message_for_open_conversation_counts_without_toast() {
        let mut inbox = Inbox::new();
        let delivery = inbox.receive(new_message(42), Some(42));
        assert!(delivery.toast.is_none());
        assert_eq!(inbox.unread_messages_count(), 1);
        assert_eq!(inbox.unread_count(), 0);
        assert!(inbox.notifications().is_empty());
        assert_eq!(
            delivery.event,
            RealtimeEvent::MessageNotification {
                conversation_id: Some(42)
            }
        );
    }

    #[test]
    fn message_for_other_conversation_toasts_with_jump_action() {
        let mut inbox = Inbox::new();
        let delivery = inbox.receive(new_message(42), Some(7));
        let toast = delivery.toast.unwrap();
        assert_eq!(toast.action.unwrap().route, Route::Chat(42));
        assert_eq!(inbox.unread_messages_count(), 1);

        inbox.receive(new_message(42), None);
        assert_eq!(inbox.unread_messages_count(), 2);
    }

    #[test]
    fn other_kinds_are_listed_newest_first() {
        let mut inbox = Inbox::new();
        inbox.receive(
            feed(json!({"type": "CONNECTION_REQUEST", "entityId": 1, "message": "first"})),
            None,
        );
        let delivery = inbox.receive(
            feed(json!({"type": "CONNECTION_ACCEPTED", "entityId": 2, "message": "second"})),
            None,
        );
        assert_eq!(delivery.toast.unwrap().action.unwrap().route, Route::Chats);
        assert_eq!(inbox.unread_count(), 2);
        let messages: Vec<&str> = inbox.notifications().iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["second", "first"]);
    }

    #[test]
    fn clears_are_independent() {
        let mut inbox = Inbox::new();
        inbox.receive(new_message(42), None);
        inbox.receive(
            feed(json!({"type": "CONNECTION_STATUS_CHANGED", "entityId": 3, "message": "x"})),
            None,
        );

        inbox.clear_notifications();
        assert!(inbox.notifications().is_empty());
        assert_eq!(inbox.unread_count(), 0);
        assert_eq!(inbox.unread_messages_count(), 1);

        inbox.clear_messages_count();
        assert_eq!(inbox.unread_messages_count(), 0);
    }
}
