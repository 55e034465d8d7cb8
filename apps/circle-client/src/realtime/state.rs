use std::fmt;

/// Lifecycle of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not started, or stopped. No transport, no timers.
    #[default]
    Disconnected,
    /// Fetching a token or waiting for the broker's CONNECTED frame.
    Connecting,
    /// Handshake done, notification feed subscribed.
    Connected,
    /// The last attempt or connection failed; a reconnect is scheduled.
    Failed,
}

impl ConnectionState {
    /// Whether a live/offline indicator should show "live".
    pub fn is_live(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        })
    }
}
