//! Conversation subscriptions, at most one per conversation.

use std::sync::Arc;

use circle_common::{ChatMessage, ConversationId};
use dashmap::DashMap;

/// Callback invoked for every chat message on a conversation topic.
pub type MessageCallback = Arc<dyn Fn(ChatMessage) + Send + Sync>;

#[derive(Clone)]
pub struct SubscriptionEntry {
    pub subscription_id: String,
    pub destination: String,
    pub callback: MessageCallback,
}

/// Registry of live conversation subscriptions.
///
/// The entry's `subscription_id` is what the broker echoes back in the
/// `subscription` header, so a frame is only delivered when it was sent for
/// the entry that is current now.
pub struct SubscriptionRegistry {
    entries: DashMap<ConversationId, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Install `entry` for `conversation_id`, returning the one it displaced.
    pub fn replace(
        &self,
        conversation_id: ConversationId,
        entry: SubscriptionEntry,
    ) -> Option<SubscriptionEntry> {
        self.entries.insert(conversation_id, entry)
    }

    /// Remove the entry only if it is still `subscription_id`.
    pub fn remove_if_current(&self, conversation_id: ConversationId, subscription_id: &str) -> bool {
        self.entries
            .remove_if(&conversation_id, |_, e| e.subscription_id == subscription_id)
            .is_some()
    }

    pub fn is_current(&self, conversation_id: ConversationId, subscription_id: &str) -> bool {
        self.entries
            .get(&conversation_id)
            .is_some_and(|e| e.subscription_id == subscription_id)
    }

    /// Callback for a frame, if `subscription_id` is the current one.
    ///
    /// The callback is cloned out so no shard lock is held while it runs.
    pub fn callback_for(
        &self,
        conversation_id: ConversationId,
        subscription_id: &str,
    ) -> Option<MessageCallback> {
        let entry = self.entries.get(&conversation_id)?;
        (entry.subscription_id == subscription_id).then(|| entry.callback.clone())
    }

    /// `(subscription_id, destination)` for every entry, to replay after a reconnect.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|e| (e.subscription_id.clone(), e.destination.clone()))
            .collect()
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let before = self.entries.len();
        self.entries.clear();
        before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
