//! In-process transport. Each `open()` hands the other end of the link to a
//! [`MemoryBroker`], which plays the server.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Link, Transport, TransportEvent};
use crate::error::TransportError;

pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    opened: AtomicUsize,
    refusing: AtomicBool,
}

/// Server side: receives one [`MemoryPeer`] per opened link.
pub struct MemoryBroker {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server end of one link.
pub struct MemoryPeer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, MemoryBroker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            peers: tx,
            opened: AtomicUsize::new(0),
            refusing: AtomicBool::new(false),
        };
        (transport, MemoryBroker { peers: rx })
    }

    /// Number of links opened so far (refused attempts not included).
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Make subsequent `open()` calls fail as if the endpoint were down.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<Link, TransportError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.peers
            .send(MemoryPeer {
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| TransportError::Closed)?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Link::new(out_tx, in_rx))
    }
}

impl MemoryBroker {
    /// Wait for the client to open the next link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

impl MemoryPeer {
    /// Next text the client sent, or `None` once the client closed the link.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub fn send(&self, text: impl Into<String>) -> bool {
        self.to_client.send(TransportEvent::Message(text.into())).is_ok()
    }

    /// Close the link from the server side.
    pub fn close(self, code: u16, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_and_peer_exchange_text() {
        let (transport, mut broker) = MemoryTransport::pair();
        let mut link = transport.open().await.unwrap();
        let mut peer = broker.accept().await.unwrap();
        assert_eq!(transport.open_count(), 1);

        link.send("ping".into()).unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("ping"));

        assert!(peer.send("pong"));
        assert_eq!(link.recv().await, TransportEvent::Message("pong".into()));

        peer.close(1000, "bye");
        assert_eq!(
            link.recv().await,
            TransportEvent::Closed {
                code: Some(1000),
                reason: "bye".into()
            }
        );
        // Peer gone entirely: still reads as closed.
        assert!(matches!(link.recv().await, TransportEvent::Closed { .. }));
    }

    #[tokio::test]
    async fn refusing_transport_fails_open() {
        let (transport, _broker) = MemoryTransport::pair();
        transport.set_refusing(true);
        assert!(transport.open().await.is_err());
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn closing_link_ends_peer_stream() {
        let (transport, mut broker) = MemoryTransport::pair();
        let link = transport.open().await.unwrap();
        let mut peer = broker.accept().await.unwrap();
        link.close().await;
        assert_eq!(peer.recv().await, None);
    }
}
