//! SockJS over a raw WebSocket.
//!
//! The broker exposes a SockJS endpoint. Its WebSocket leg lives at
//! `{endpoint}/{server-id}/{session-id}/websocket` and wraps every payload in
//! SockJS framing. Server frames:
//!
//! - `o`: session open
//! - `h`: keep-alive
//! - `a["m1","m2"]`: batch of messages
//! - `m"m1"`: single message
//! - `c[3000,"reason"]`: session closed
//!
//! Client frames are JSON arrays of strings.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{Link, Transport, TransportEvent};
use crate::error::TransportError;

/// Default SockJS endpoint path on the API server.
pub const DEFAULT_ENDPOINT_PATH: &str = "/ws";

/// One decoded SockJS server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

impl SockJsFrame {
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| TransportError::Framing("empty frame".to_string()))?;
        let rest = chars.as_str();
        let bad = |what: &str| TransportError::Framing(format!("{what}: {text}"));

        match kind {
            'o' => Ok(Self::Open),
            'h' => Ok(Self::Heartbeat),
            'a' => serde_json::from_str::<Vec<String>>(rest)
                .map(Self::Messages)
                .map_err(|_| bad("bad message array")),
            'm' => serde_json::from_str::<String>(rest)
                .map(|m| Self::Messages(vec![m]))
                .map_err(|_| bad("bad single message")),
            'c' => {
                let parts: Vec<Value> =
                    serde_json::from_str(rest).map_err(|_| bad("bad close frame"))?;
                let code = parts.first().and_then(Value::as_u64).unwrap_or(0) as u16;
                let reason = parts
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(Self::Close { code, reason })
            }
            _ => Err(bad("unknown frame type")),
        }
    }
}

/// Wrap outbound messages the way a SockJS server expects them.
pub fn encode_messages(messages: &[String]) -> String {
    serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string())
}

/// Build the WebSocket URL for a SockJS session.
pub fn endpoint_url(
    base_url: &str,
    endpoint_path: &str,
    server_id: u16,
    session_id: &str,
) -> Result<String, TransportError> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(TransportError::InvalidUrl(base_url.to_string()));
    };
    let path = endpoint_path.trim_matches('/');
    Ok(format!("{ws_base}/{path}/{server_id:03}/{session_id}/websocket"))
}

/// SockJS session id: 8 random alphanumerics.
fn random_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Opens SockJS WebSocket sessions against the API server.
pub struct SockJsTransport {
    base_url: String,
    endpoint_path: String,
}

impl SockJsTransport {
    pub fn new(base_url: &str) -> Self {
        Self::with_endpoint(base_url, DEFAULT_ENDPOINT_PATH)
    }

    pub fn with_endpoint(base_url: &str, endpoint_path: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            endpoint_path: endpoint_path.to_string(),
        }
    }
}

#[async_trait]
impl Transport for SockJsTransport {
    async fn open(&self) -> Result<Link, TransportError> {
        let server_id = rand::thread_rng().gen_range(0..1000u16);
        let url = endpoint_url(&self.base_url, &self.endpoint_path, server_id, &random_session_id())?;
        tracing::debug!(%url, "opening sockjs websocket");

        let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                let frame = encode_messages(&[text]);
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::debug!(?e, "sockjs write failed");
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let reader = tokio::spawn(async move {
            let closed = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => match SockJsFrame::decode(text.as_str()) {
                        Ok(SockJsFrame::Open) | Ok(SockJsFrame::Heartbeat) => continue,
                        Ok(SockJsFrame::Messages(messages)) => {
                            for m in messages {
                                if in_tx.send(TransportEvent::Message(m)).is_err() {
                                    return;
                                }
                            }
                        }
                        Ok(SockJsFrame::Close { code, reason }) => {
                            break TransportEvent::Closed {
                                code: Some(code),
                                reason,
                            }
                        }
                        Err(e) => tracing::warn!(%e, "dropping malformed sockjs frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break TransportEvent::Closed {
                            code: frame.as_ref().map(|f| u16::from(f.code)),
                            reason: frame
                                .map(|f| f.reason.as_str().to_string())
                                .unwrap_or_default(),
                        }
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        break TransportEvent::Closed {
                            code: None,
                            reason: e.to_string(),
                        }
                    }
                    None => {
                        break TransportEvent::Closed {
                            code: None,
                            reason: "socket ended".to_string(),
                        }
                    }
                }
            };
            let _ = in_tx.send(closed);
        });

        Ok(Link::new(out_tx, in_rx).with_pumps(writer, reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_server_frames() {
        assert_eq!(SockJsFrame::decode("o").unwrap(), SockJsFrame::Open);
        assert_eq!(SockJsFrame::decode("h").unwrap(), SockJsFrame::Heartbeat);
        assert_eq!(
            SockJsFrame::decode(r#"a["CONNECTED\nversion:1.2\n\n\u0000","\n"]"#).unwrap(),
            SockJsFrame::Messages(vec!["CONNECTED\nversion:1.2\n\n\0".into(), "\n".into()])
        );
        assert_eq!(
            SockJsFrame::decode(r#"m"hello""#).unwrap(),
            SockJsFrame::Messages(vec!["hello".into()])
        );
        assert_eq!(
            SockJsFrame::decode(r#"c[3000,"Go away!"]"#).unwrap(),
            SockJsFrame::Close {
                code: 3000,
                reason: "Go away!".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(SockJsFrame::decode("").is_err());
        assert!(SockJsFrame::decode("x").is_err());
        assert!(SockJsFrame::decode("a[1,2").is_err());
        assert!(SockJsFrame::decode("c{}").is_err());
    }

    #[test]
    fn encodes_client_frames_as_json_arrays() {
        let frame = encode_messages(&["SUBSCRIBE\nid:1\n\n\0".to_string()]);
        assert_eq!(frame, r#"["SUBSCRIBE\nid:1\n\n\u0000"]"#);
    }

    #[test]
    fn builds_endpoint_urls() {
        assert_eq!(
            endpoint_url("http://localhost:8080/", "/ws", 7, "abcd1234").unwrap(),
            "ws://localhost:8080/ws/007/abcd1234/websocket"
        );
        assert_eq!(
            endpoint_url("https://api.skillcircle.app", "ws", 123, "s").unwrap(),
            "wss://api.skillcircle.app/ws/123/s/websocket"
        );
        assert!(endpoint_url("ftp://nope", "/ws", 1, "s").is_err());
    }

    #[test]
    fn session_ids_are_short_lowercase_tokens() {
        let id = random_session_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
