//! In-process transport backed by tokio channels.
//!
//! [`MemoryConnector::pair`] returns the connector handed to the supervisor
//! and a [`MemoryPeer`] that plays the remote endpoint in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{
    Connector, Duplex, Frame, FrameSink, FrameSource, Liveness, TransportError, TransportOptions,
};

/// What the local side sent to the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    /// A text frame.
    Text(String),
    /// A ping.
    Ping,
    /// A close frame with its code.
    Close(u16),
}

/// What the peer sends to the local side.
enum Inbound {
    Frame(Frame),
    Pong,
    Fail(String),
}

struct LocalEnds {
    to_peer: mpsc::UnboundedSender<PeerEvent>,
    from_peer: mpsc::UnboundedReceiver<Inbound>,
}

/// Connector producing one in-memory connection.
pub struct MemoryConnector {
    ends: Mutex<Option<LocalEnds>>,
    refuse: Option<String>,
    address: watch::Sender<Option<String>>,
}

impl MemoryConnector {
    /// A connector and the peer it will connect to. Only one `connect`
    /// succeeds; later attempts fail.
    pub fn pair() -> (Self, MemoryPeer) {
        let (to_peer, peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, from_peer) = mpsc::unbounded_channel();
        let (address, address_rx) = watch::channel(None);
        let connector = Self {
            ends: Mutex::new(Some(LocalEnds { to_peer, from_peer })),
            refuse: None,
            address,
        };
        let peer = MemoryPeer {
            tx: peer_tx,
            rx: peer_rx,
            address: address_rx,
        };
        (connector, peer)
    }

    /// A connector whose `connect` always fails with `reason`.
    pub fn refusing(reason: impl Into<String>) -> Self {
        let (address, _) = watch::channel(None);
        Self {
            ends: Mutex::new(None),
            refuse: Some(reason.into()),
            address,
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        address: &str,
        options: &TransportOptions,
    ) -> Result<Duplex, TransportError> {
        if let Some(reason) = &self.refuse {
            return Err(TransportError::Connect(reason.clone()));
        }
        let Some(ends) = self.ends.lock().take() else {
            return Err(TransportError::Connect("memory connection already used".into()));
        };
        debug!(address, "memory transport connected");
        let _ = self.address.send_replace(Some(address.to_owned()));

        let liveness = Arc::new(Liveness::new());
        Ok(Duplex {
            sink: Box::new(MemorySink {
                tx: ends.to_peer,
                closed: false,
            }),
            source: Box::new(MemorySource {
                rx: ends.from_peer,
                liveness: Arc::clone(&liveness),
                receive_timeout: options.receive_timeout,
            }),
            liveness,
        })
    }
}

struct MemorySink {
    tx: mpsc::UnboundedSender<PeerEvent>,
    closed: bool,
}

impl MemorySink {
    fn push(&mut self, event: PeerEvent) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.tx.send(event).map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.push(PeerEvent::Text(text))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.push(PeerEvent::Ping)
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        let result = self.push(PeerEvent::Close(code));
        self.closed = true;
        result
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Inbound>,
    liveness: Arc<Liveness>,
    receive_timeout: Option<Duration>,
}

impl MemorySource {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        match self.receive_timeout {
            Some(limit) => tokio::time::timeout(limit, self.rx.recv())
                .await
                .map_err(|_| TransportError::ReceiveTimeout(limit)),
            None => Ok(self.rx.recv().await),
        }
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            let Some(inbound) = self.recv().await? else {
                return Ok(None);
            };
            self.liveness.mark_alive();
            match inbound {
                Inbound::Frame(frame) => return Ok(Some(frame)),
                Inbound::Pong => {}
                Inbound::Fail(reason) => return Err(TransportError::Io(reason)),
            }
        }
    }
}

/// The remote end of a memory connection.
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<Inbound>,
    rx: mpsc::UnboundedReceiver<PeerEvent>,
    address: watch::Receiver<Option<String>>,
}

impl MemoryPeer {
    fn push(&self, inbound: Inbound) {
        // the local side may already be gone; tests observe that elsewhere
        let _ = self.tx.send(inbound);
    }

    /// Send a text frame to the local side.
    pub fn send_text(&self, text: impl Into<String>) {
        self.push(Inbound::Frame(Frame::Text(text.into())));
    }

    /// Send a binary frame to the local side.
    pub fn send_binary(&self, data: Vec<u8>) {
        self.push(Inbound::Frame(Frame::Binary(data)));
    }

    /// Answer a ping.
    pub fn pong(&self) {
        self.push(Inbound::Pong);
    }

    /// Close the connection with `code`.
    pub fn close(&self, code: u16) {
        self.push(Inbound::Frame(Frame::Close(Some(code))));
    }

    /// Deliver a non-fatal transport error frame.
    pub fn error_frame(&self, reason: impl Into<String>) {
        self.push(Inbound::Frame(Frame::Error(reason.into())));
    }

    /// Make the local receive half fail with an I/O error.
    pub fn fail(&self, reason: impl Into<String>) {
        self.push(Inbound::Fail(reason.into()));
    }

    /// Next event sent by the local side; `None` once it dropped its sink.
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.rx.recv().await
    }

    /// Next text frame, skipping pings. `None` on close or disconnect.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await? {
                PeerEvent::Text(text) => return Some(text),
                PeerEvent::Ping => {}
                PeerEvent::Close(_) => return None,
            }
        }
    }

    /// Next text frame parsed as JSON. Panics on anything else.
    #[cfg(test)]
    pub async fn recv_json(&mut self) -> serde_json::Value {
        let text = self.recv_text().await.expect("peer expected a text frame");
        serde_json::from_str(&text).expect("peer expected JSON")
    }

    /// Wait until the local side connects; returns the address it used.
    pub async fn connected_address(&mut self) -> Option<String> {
        self.address
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|addr| addr.clone())
    }

    /// Drop the connection without a close frame (end of stream).
    pub fn disconnect(self) {
        drop(self);
    }
}
