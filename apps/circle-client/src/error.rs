use thiserror::Error;

/// A STOMP frame that could not be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("malformed header line `{0}`")]
    MalformedHeader(String),
    #[error("invalid escape sequence in `{0}`")]
    InvalidEscape(String),
    #[error("frame is missing its header terminator")]
    Truncated,
}

/// Failures of the underlying socket or its SockJS framing.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint url `{0}`")]
    InvalidUrl(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed sockjs frame: {0}")]
    Framing(String),
    #[error("transport closed")]
    Closed,
}

/// Failures while obtaining a bearer token.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("token endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint returned {0}")]
    Status(reqwest::StatusCode),
}

/// Why a connection attempt or a live connection ended.
///
/// None of these ever reach callers of the manager; they are logged and
/// answered with a scheduled reconnect.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("no credential available")]
    NoCredential,
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("transport closed (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },
    #[error("broker error: {0}")]
    Broker(String),
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("server heartbeat missed")]
    HeartbeatTimeout,
}
