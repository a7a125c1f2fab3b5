//! Framed duplex transport abstraction.
//!
//! A [`Connector`] opens a connection and yields a [`Duplex`]: a send half
//! ([`FrameSink`]), a receive half ([`FrameSource`]), and shared
//! [`Liveness`] bookkeeping used by the heartbeat. The connection core only
//! ever talks to these traits.

pub mod liveness;
pub mod memory;
pub mod proxy;
pub mod websocket;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use liveness::Liveness;
pub use memory::{MemoryConnector, MemoryPeer, PeerEvent};
pub use websocket::WebSocketConnector;

/// Close code sent when this side goes away (RFC 6455 §7.4.1).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// One inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text payload.
    Text(String),
    /// Binary payload.
    Binary(Vec<u8>),
    /// The peer closed the connection, with its close code if any.
    Close(Option<u16>),
    /// The transport reported a non-fatal protocol-level error.
    Error(String),
}

/// Transport failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Could not establish the connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Opening the connection took longer than the configured timeout.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// Nothing was received within the receive timeout.
    #[error("no frame received within {0:?}")]
    ReceiveTimeout(Duration),

    /// I/O failure on an open connection.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,

    /// No transport is attached (not yet connected, or already torn down).
    #[error("not connected")]
    NotConnected,

    /// The requested option is not supported by this transport.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The HTTP proxy refused or failed the tunnel.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// The peer stopped answering heartbeat pings.
    #[error("no pong received within {0:?}")]
    HeartbeatTimeout(Duration),
}

/// Send half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a transport-level ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection with `code`.
    async fn close(&mut self, code: u16) -> Result<(), TransportError>;
}

/// Receive half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound frame; `Ok(None)` at end of stream.
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// An open connection split into halves.
pub struct Duplex {
    /// Send half.
    pub sink: Box<dyn FrameSink>,
    /// Receive half.
    pub source: Box<dyn FrameSource>,
    /// Pong/activity tracking shared with the receive half.
    pub liveness: Arc<Liveness>,
}

impl fmt::Debug for Duplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Duplex").finish_non_exhaustive()
    }
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `address` with `options`.
    async fn connect(
        &self,
        address: &str,
        options: &TransportOptions,
    ) -> Result<Duplex, TransportError>;
}

/// Basic credentials for an HTTP proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyAuth {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Transport tuning, passed through to the connector.
#[derive(Clone)]
pub struct TransportOptions {
    /// Answer peer pings automatically.
    pub auto_ping: bool,
    /// Timeout for opening the connection.
    pub open_timeout: Duration,
    /// Sub-protocols offered during the handshake.
    pub protocols: Vec<String>,
    /// Maximum silence on the receive side.
    pub receive_timeout: Option<Duration>,
    /// Answer a peer close frame automatically.
    pub auto_close: bool,
    /// Heartbeat ping interval.
    pub heartbeat: Option<Duration>,
    /// `Origin` header value.
    pub origin: Option<String>,
    /// Extra handshake headers.
    pub headers: BTreeMap<String, String>,
    /// HTTP proxy URL.
    pub proxy: Option<String>,
    /// Proxy basic-auth credentials.
    pub proxy_auth: Option<ProxyAuth>,
    /// Extra headers for the proxy `CONNECT` request.
    pub proxy_headers: BTreeMap<String, String>,
    /// TLS connector for `wss://` endpoints; `None` uses the built-in default.
    #[cfg(feature = "rustls")]
    pub tls: Option<tokio_tungstenite::Connector>,
    /// Compression level (0 disables).
    pub compress: u8,
    /// Maximum incoming message size in bytes.
    pub max_msg_size: usize,
    /// Upgrade request HTTP method.
    pub method: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            auto_ping: true,
            open_timeout: Duration::from_secs(5),
            protocols: Vec::new(),
            receive_timeout: Some(Duration::from_secs(600)),
            auto_close: true,
            heartbeat: Some(Duration::from_secs(30)),
            origin: None,
            headers: BTreeMap::new(),
            proxy: None,
            proxy_auth: None,
            proxy_headers: BTreeMap::new(),
            #[cfg(feature = "rustls")]
            tls: None,
            compress: 0,
            max_msg_size: 4 * 1024 * 1024,
            method: "GET".to_owned(),
        }
    }
}

impl TransportOptions {
    /// Build from serializable settings. The TLS connector stays unset.
    pub fn from_settings(settings: &wsrpc_core::TransportSettings) -> Self {
        Self {
            auto_ping: settings.auto_ping,
            open_timeout: settings.timeout(),
            protocols: settings.protocols.clone(),
            receive_timeout: settings.receive_timeout(),
            auto_close: settings.auto_close,
            heartbeat: settings.heartbeat(),
            origin: settings.origin.clone(),
            headers: settings.headers.clone(),
            proxy: settings.proxy.clone(),
            proxy_auth: settings.proxy_auth.as_ref().map(|a| ProxyAuth {
                username: a.username.clone(),
                password: a.password.clone(),
            }),
            proxy_headers: settings.proxy_headers.clone(),
            #[cfg(feature = "rustls")]
            tls: None,
            compress: settings.compress,
            max_msg_size: settings.max_msg_size,
            method: settings.method.clone(),
        }
    }
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("TransportOptions");
        let _ = out
            .field("auto_ping", &self.auto_ping)
            .field("open_timeout", &self.open_timeout)
            .field("protocols", &self.protocols)
            .field("receive_timeout", &self.receive_timeout)
            .field("auto_close", &self.auto_close)
            .field("heartbeat", &self.heartbeat)
            .field("origin", &self.origin)
            .field("headers", &self.headers)
            .field("proxy", &self.proxy)
            .field("proxy_auth", &self.proxy_auth.as_ref().map(|a| &a.username))
            .field("compress", &self.compress)
            .field("max_msg_size", &self.max_msg_size)
            .field("method", &self.method);
        #[cfg(feature = "rustls")]
        let _ = out.field("tls", &self.tls.is_some());
        out.finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsrpc_core::{ProxyAuthSettings, TransportSettings};

    #[test]
    fn defaults_match_settings_defaults() {
        let from_settings = TransportOptions::from_settings(&TransportSettings::default());
        let defaults = TransportOptions::default();
        assert_eq!(from_settings.open_timeout, defaults.open_timeout);
        assert_eq!(from_settings.receive_timeout, defaults.receive_timeout);
        assert_eq!(from_settings.heartbeat, defaults.heartbeat);
        assert_eq!(from_settings.max_msg_size, defaults.max_msg_size);
        assert_eq!(from_settings.method, defaults.method);
        #[cfg(feature = "rustls")]
        assert!(from_settings.tls.is_none());
    }

    #[test]
    fn proxy_auth_converted() {
        let settings = TransportSettings {
            proxy: Some("http://proxy:3128".into()),
            proxy_auth: Some(ProxyAuthSettings {
                username: "u".into(),
                password: "p".into(),
            }),
            ..Default::default()
        };
        let opts = TransportOptions::from_settings(&settings);
        assert_eq!(
            opts.proxy_auth,
            Some(ProxyAuth {
                username: "u".into(),
                password: "p".into()
            })
        );
    }

    #[test]
    fn debug_hides_password() {
        let opts = TransportOptions {
            proxy_auth: Some(ProxyAuth {
                username: "user".into(),
                password: "hunter2".into(),
            }),
            ..Default::default()
        };
        let out = format!("{opts:?}");
        assert!(out.contains("user"));
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn error_messages() {
        assert_eq!(TransportError::Closed.to_string(), "connection closed");
        assert!(
            TransportError::HeartbeatTimeout(Duration::from_secs(45))
                .to_string()
                .contains("45s")
        );
    }
}
