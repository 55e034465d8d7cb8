use std::time::Duration;

use circle_common::ConversationId;

/// Circle client configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// The API server origin (e.g. `http://localhost:8080`).
    pub api_base_url: String,
    /// Where bearer tokens come from.
    pub credentials: CredentialConfig,
    /// Connection manager tuning.
    pub realtime: RealtimeConfig,
    /// Conversations the headless client follows once connected.
    pub watch_conversations: Vec<ConversationId>,
    /// Own user id. Messages from this user are left out of the merged view.
    pub user_id: Option<String>,
}

/// How the client obtains bearer tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialConfig {
    /// A pre-issued token (`CIRCLE_TOKEN`).
    Static(String),
    /// Mint tokens from a session-token endpoint (`TOKEN_URL` + `SESSION_KEY`).
    Session { token_url: String, session_key: String },
    /// Nobody is signed in; the manager keeps retrying until a token appears.
    SignedOut,
}

/// Timers of the realtime connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Wait after a failure before the next attempt.
    pub reconnect_delay: Duration,
    /// When set, the delay doubles per consecutive failure up to this cap.
    pub max_reconnect_delay: Option<Duration>,
    /// Reconnect with a fresh token this long after each successful connect.
    pub token_refresh_interval: Duration,
    /// Heart-beat interval requested in both directions.
    pub heartbeat: Duration,
    /// Deadline for CONNECTED after CONNECT is sent.
    pub handshake_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: None,
            // Tokens live an hour; refresh ten minutes early.
            token_refresh_interval: Duration::from_secs(50 * 60),
            heartbeat: Duration::from_secs(4),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl RealtimeConfig {
    /// Delay before the attempt that follows `failures` consecutive failures.
    pub fn reconnect_delay_for(&self, failures: u32) -> Duration {
        let Some(cap) = self.max_reconnect_delay else {
            return self.reconnect_delay;
        };
        let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
        self.reconnect_delay.saturating_mul(factor).min(cap.max(self.reconnect_delay))
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());
        let millis = |name: &str| {
            var(name)
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_millis)
        };
        let secs = |name: &str| {
            var(name)
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs)
        };

        let defaults = RealtimeConfig::default();
        let realtime = RealtimeConfig {
            reconnect_delay: millis("RECONNECT_DELAY_MS").unwrap_or(defaults.reconnect_delay),
            max_reconnect_delay: millis("MAX_RECONNECT_DELAY_MS"),
            token_refresh_interval: secs("TOKEN_REFRESH_SECS")
                .unwrap_or(defaults.token_refresh_interval),
            heartbeat: millis("HEARTBEAT_MS").unwrap_or(defaults.heartbeat),
            handshake_timeout: secs("HANDSHAKE_TIMEOUT_SECS").unwrap_or(defaults.handshake_timeout),
        };

        let credentials = match (var("CIRCLE_TOKEN"), var("TOKEN_URL"), var("SESSION_KEY")) {
            (Some(token), _, _) => CredentialConfig::Static(token),
            (None, Some(token_url), Some(session_key)) => CredentialConfig::Session {
                token_url,
                session_key,
            },
            _ => CredentialConfig::SignedOut,
        };

        Self {
            api_base_url: var("API_BASE_URL")
                .unwrap_or_else(|| panic!("API_BASE_URL env var is required")),
            credentials,
            realtime,
            watch_conversations: var("WATCH_CONVERSATIONS")
                .map(|v| parse_id_list(&v))
                .unwrap_or_default(),
            user_id: var("USER_ID"),
        }
    }
}

/// `"42, 43,x"` → `[42, 43]`. Entries that are not integers are skipped.
fn parse_id_list(value: &str) -> Vec<ConversationId> {
    value
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}
