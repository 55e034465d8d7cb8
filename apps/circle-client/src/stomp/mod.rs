//! STOMP sub-protocol spoken over the transport, plus the broker's topic layout.

pub mod frame;

pub use frame::{decode_all, Command, Frame, HeartBeat};

use circle_common::ConversationId;

/// Per-user private queue carrying notifications.
pub const NOTIFICATION_FEED: &str = "/user/queue/notifications";

/// Subscription id used for the notification feed on every connection.
pub const NOTIFICATION_SUBSCRIPTION_ID: &str = "sub_notifications";

const CONVERSATION_TOPIC_PREFIX: &str = "/topic/connection/";

/// Topic carrying chat messages for one conversation.
pub fn conversation_topic(id: ConversationId) -> String {
    format!("{CONVERSATION_TOPIC_PREFIX}{id}")
}

/// Inverse of [`conversation_topic`].
pub fn parse_conversation_topic(destination: &str) -> Option<ConversationId> {
    destination
        .strip_prefix(CONVERSATION_TOPIC_PREFIX)?
        .parse()
        .ok()
}
