//! Chat view that merges several conversations with the same peer.
//!
//! Two users can be connected more than once (one connection per skill
//! exchange). The chat screen shows all of them as one thread, so live
//! messages from every conversation land in one list.

use std::collections::HashSet;

use circle_common::{ChatMessage, ConversationId};

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadEntry {
    pub conversation_id: ConversationId,
    pub message: ChatMessage,
}

/// Messages from several conversations, oldest first, without duplicates.
#[derive(Debug, Default)]
pub struct MergedThread {
    self_user_id: Option<String>,
    entries: Vec<ThreadEntry>,
    seen: HashSet<i64>,
}

impl MergedThread {
    /// `self_user_id` is the signed-in user. Their live messages are skipped
    /// because the sender already shows them optimistically.
    pub fn new(self_user_id: Option<String>) -> Self {
        Self {
            self_user_id,
            ..Self::default()
        }
    }

    /// Merge a message that arrived on a conversation topic.
    ///
    /// Returns `false` for own messages and for ids already in the thread.
    pub fn push_live(&mut self, conversation_id: ConversationId, message: ChatMessage) -> bool {
        if self.is_own(&message) {
            return false;
        }
        self.insert(conversation_id, message)
    }

    pub fn entries(&self) -> &[ThreadEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_own(&self, message: &ChatMessage) -> bool {
        match (&self.self_user_id, &message.sender) {
            (Some(me), Some(sender)) => sender.clerk_user_id == *me,
            _ => false,
        }
    }

    fn insert(&mut self, conversation_id: ConversationId, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        // Undated messages sort last; equal timestamps keep arrival order.
        let key = message.timestamp;
        let at = self.entries.partition_point(|e| match (e.message.timestamp, key) {
            (Some(a), Some(b)) => a <= b,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => true,
        });
        self.entries.insert(
            at,
            ThreadEntry {
                conversation_id,
                message,
            },
        );
        true
    }
}
