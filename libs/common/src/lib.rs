pub mod id;
pub mod wire;

pub use id::PrefixedId;
pub use wire::{Author, ChatMessage, ConversationId, NotificationKind, NotificationPayload};
