//! JSON payloads carried on the broker topics.
//!
//! Field names follow the server DTOs (`type`, `entityId`, `data`, ...), so these
//! types deserialize inbound frame bodies directly.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Identifier of an approved connection between two users (a conversation).
pub type ConversationId = i64;

/// Notification classes published on the private feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    ConnectionRequest,
    ConnectionAccepted,
    ConnectionStatusChanged,
    NewMessage,
    /// Any kind this client does not know about, kept verbatim.
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionRequest => "CONNECTION_REQUEST",
            Self::ConnectionAccepted => "CONNECTION_ACCEPTED",
            Self::ConnectionStatusChanged => "CONNECTION_STATUS_CHANGED",
            Self::NewMessage => "NEW_MESSAGE",
            Self::Other(s) => s,
        }
    }

    pub fn is_chat_message(&self) -> bool {
        matches!(self, Self::NewMessage)
    }
}

impl From<String> for NotificationKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "CONNECTION_REQUEST" => Self::ConnectionRequest,
            "CONNECTION_ACCEPTED" => Self::ConnectionAccepted,
            "CONNECTION_STATUS_CHANGED" => Self::ConnectionStatusChanged,
            "NEW_MESSAGE" => Self::NewMessage,
            _ => Self::Other(s),
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a frame on the private notification feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Connection id or message id, depending on `kind`.
    #[serde(rename = "entityId", default)]
    pub related_entity_id: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<NaiveDateTime>,
    /// The related DTO (a connection or a chat message).
    #[serde(rename = "data", default)]
    pub payload: Value,
}

impl NotificationPayload {
    /// Conversation a `NEW_MESSAGE` notification belongs to.
    ///
    /// Looks at `data.connection.id`, then `data.connectionId`, and falls back
    /// to `entityId`.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.payload
            .pointer("/connection/id")
            .and_then(Value::as_i64)
            .or_else(|| self.payload.get("connectionId").and_then(Value::as_i64))
            .or(self.related_entity_id)
    }

    /// Chat content carried in `data.content`, if any.
    pub fn content(&self) -> &str {
        self.payload
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// Sender profile attached to chat messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    #[serde(default)]
    pub clerk_user_id: String,
    #[serde(default)]
    pub generated_username: String,
}

/// Body of a frame on a conversation topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(default)]
    pub sender: Option<Author>,
}

/// Accepts ISO-8601 local or offset timestamps and the `[y, m, d, h, min, s, nanos]`
/// array form. Anything else becomes `None` instead of failing the whole frame.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s
            .parse::<NaiveDateTime>()
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.naive_utc())),
        Value::Array(parts) => {
            let n: Vec<i64> = parts.iter().filter_map(Value::as_i64).collect();
            match n.as_slice() {
                [y, mo, d, rest @ ..] => {
                    let field = |i: usize| rest.get(i).copied().unwrap_or(0) as u32;
                    NaiveDate::from_ymd_opt(*y as i32, *mo as u32, *d as u32)
                        .and_then(|date| date.and_hms_nano_opt(field(0), field(1), field(2), field(3)))
                }
                _ => None,
            }
        }
        _ => None,
    })
}
