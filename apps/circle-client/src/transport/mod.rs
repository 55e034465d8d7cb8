//! The duplex text channel STOMP frames travel over.
//!
//! A [`Transport`] opens [`Link`]s. The manager only ever sees a link as a
//! sender of outbound text plus a stream of [`TransportEvent`]s, so the SockJS
//! WebSocket and the in-memory transport are interchangeable.

pub mod memory;
pub mod sockjs;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

use crate::error::TransportError;

pub use memory::{MemoryBroker, MemoryPeer, MemoryTransport};
pub use sockjs::SockJsTransport;

/// How long `Link::close` waits for the writer to flush before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Something that happened on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One application message (may hold several STOMP frames).
    Message(String),
    /// The link is gone. No further events follow.
    Closed { code: Option<u16>, reason: String },
}

/// Opens links to the broker endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<Link, TransportError>;
}

/// One open connection. Dropping it aborts its I/O tasks.
pub struct Link {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Link {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            inbound,
            writer: None,
            reader: None,
        }
    }

    /// Attach the tasks pumping a real socket so they live and die with the link.
    pub fn with_pumps(mut self, writer: JoinHandle<()>, reader: JoinHandle<()>) -> Self {
        self.writer = Some(writer);
        self.reader = Some(reader);
        self
    }

    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    /// Next event. A vanished peer reads as `Closed`.
    pub async fn recv(&mut self) -> TransportEvent {
        self.inbound.recv().await.unwrap_or(TransportEvent::Closed {
            code: None,
            reason: "transport dropped".to_string(),
        })
    }

    /// Stop sending, let the writer flush and close the socket, then tear down.
    pub async fn close(mut self) {
        drop(self.outbound.take());
        if let Some(mut writer) = self.writer.take() {
            if time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                writer.abort();
            }
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in [self.writer.take(), self.reader.take()].into_iter().flatten() {
            task.abort();
        }
    }
}
