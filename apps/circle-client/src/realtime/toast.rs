//! Transient notifications ("toasts") and where they route to.

use std::fmt;
use std::time::Duration;

use circle_common::{ConversationId, NotificationKind, NotificationPayload};

/// Characters of chat content shown in a message toast.
const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
}

/// Screens a toast action can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Notifications,
    Chats,
    Chat(ConversationId),
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notifications => f.write_str("/notifications"),
            Self::Chats => f.write_str("/chats"),
            Self::Chat(id) => write!(f, "/chats/{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToastAction {
    pub label: String,
    pub route: Route,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub description: Option<String>,
    pub action: Option<ToastAction>,
    pub duration: Duration,
}

impl Toast {
    fn new(level: ToastLevel, title: &str, duration_ms: u64) -> Self {
        Self {
            level,
            title: title.to_string(),
            description: None,
            action: None,
            duration: Duration::from_millis(duration_ms),
        }
    }

    fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn act(mut self, label: &str, route: Route) -> Self {
        self.action = Some(ToastAction {
            label: label.to_string(),
            route,
        });
        self
    }

    /// Toast for a chat message arriving outside the conversation on screen.
    pub fn for_message(notification: &NotificationPayload, conversation_id: ConversationId) -> Self {
        Self::new(ToastLevel::Info, &notification.message, 5000)
            .describe(preview(notification.content()))
            .act("Open Chat", Route::Chat(conversation_id))
    }

    /// Toast for a non-message notification.
    pub fn for_notification(notification: &NotificationPayload) -> Self {
        let title = notification.message.as_str();
        match notification.kind {
            NotificationKind::ConnectionRequest => Self::new(ToastLevel::Info, title, 5000)
                .describe("Click to view connection requests")
                .act("View", Route::Notifications),
            NotificationKind::ConnectionAccepted => Self::new(ToastLevel::Success, title, 5000)
                .describe("You can now start chatting")
                .act("Chat", Route::Chats),
            NotificationKind::ConnectionStatusChanged => Self::new(ToastLevel::Info, title, 3000),
            NotificationKind::NewMessage | NotificationKind::Other(_) => {
                Self::new(ToastLevel::Info, title, 4000)
            }
        }
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Surfaces toasts to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: &Toast);
}

/// Writes toasts to the log. Used when no UI is attached.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, toast: &Toast) {
        tracing::info!(
            level = ?toast.level,
            title = %toast.title,
            description = toast.description.as_deref().unwrap_or(""),
            route = toast.action.as_ref().map(|a| a.route.to_string()).unwrap_or_default(),
            "notification"
        );
    }
}
