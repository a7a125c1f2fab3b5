//! Serializable settings for one connection.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default connection name.
pub const DEFAULT_CONNECTION_NAME: &str = "ws-connection";

/// Settings for a single symmetric RPC connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Endpoint URL (`ws://` or `wss://`).
    pub url: String,
    /// Suffix appended verbatim to `url` to form the final address
    /// (MAC address, assigned number, certificate serial, ...). When used,
    /// `url` should end with `/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Human-readable connection name, used in logs.
    pub name: String,
    /// Include handler error details in JSON-RPC error responses.
    pub debug: bool,
    /// Fail the waiting request when the peer answers it with an error frame,
    /// instead of only logging the frame.
    pub fail_error_frames: bool,
    /// Transport tuning, passed through to the websocket client.
    pub transport: TransportSettings,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            identity: None,
            name: DEFAULT_CONNECTION_NAME.to_string(),
            debug: false,
            fail_error_frames: false,
            transport: TransportSettings::default(),
        }
    }
}

impl ConnectionSettings {
    /// Final address: `url` followed by the identity suffix, if any.
    pub fn address(&self) -> String {
        match &self.identity {
            Some(identity) => format!("{}{identity}", self.url),
            None => self.url.clone(),
        }
    }
}

/// Basic credentials for an HTTP proxy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuthSettings {
    /// Proxy user name.
    pub username: String,
    /// Proxy password.
    pub password: String,
}

/// Websocket transport tuning knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Answer peer pings automatically.
    pub auto_ping: bool,
    /// Timeout for opening the connection, in milliseconds.
    pub timeout_ms: u64,
    /// Websocket sub-protocols offered during the handshake.
    pub protocols: Vec<String>,
    /// Maximum silence on the receive side before failing, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receive_timeout_ms: Option<u64>,
    /// Answer a peer close frame automatically.
    pub auto_close: bool,
    /// Interval between heartbeat pings, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_ms: Option<u64>,
    /// `Origin` header value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Extra handshake headers.
    pub headers: BTreeMap<String, String>,
    /// HTTP proxy URL (`http://host:port`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Proxy basic-auth credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_auth: Option<ProxyAuthSettings>,
    /// Extra headers sent with the proxy `CONNECT` request.
    pub proxy_headers: BTreeMap<String, String>,
    /// Compression level (0 disables).
    pub compress: u8,
    /// Maximum incoming message size in bytes.
    pub max_msg_size: usize,
    /// HTTP method used for the upgrade request.
    pub method: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            auto_ping: true,
            timeout_ms: 5_000,
            protocols: Vec::new(),
            receive_timeout_ms: Some(600_000),
            auto_close: true,
            heartbeat_ms: Some(30_000),
            origin: None,
            headers: BTreeMap::new(),
            proxy: None,
            proxy_auth: None,
            proxy_headers: BTreeMap::new(),
            compress: 0,
            max_msg_size: 4 * 1024 * 1024,
            method: "GET".to_string(),
        }
    }
}

impl TransportSettings {
    /// Connection open timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Receive timeout, if enabled. Zero disables it.
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    /// Heartbeat interval, if enabled. Zero disables it.
    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat_ms.filter(|&ms| ms > 0).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_defaults() {
        let t = TransportSettings::default();
        assert!(t.auto_ping);
        assert!(t.auto_close);
        assert_eq!(t.timeout(), Duration::from_secs(5));
        assert_eq!(t.receive_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(t.heartbeat(), Some(Duration::from_secs(30)));
        assert_eq!(t.max_msg_size, 4_194_304);
        assert_eq!(t.method, "GET");
        assert_eq!(t.compress, 0);
    }

    #[test]
    fn zero_interval_means_disabled() {
        let t = TransportSettings {
            heartbeat_ms: Some(0),
            receive_timeout_ms: Some(0),
            ..Default::default()
        };
        assert_eq!(t.heartbeat(), None);
        assert_eq!(t.receive_timeout(), None);
    }

    #[test]
    fn address_without_identity() {
        let s = ConnectionSettings {
            url: "ws://host/rpc/".into(),
            ..Default::default()
        };
        assert_eq!(s.address(), "ws://host/rpc/");
        assert_eq!(s.name, DEFAULT_CONNECTION_NAME);
    }

    #[test]
    fn address_appends_identity_verbatim() {
        let s = ConnectionSettings {
            url: "ws://host/rpc/".into(),
            identity: Some("00:1A:2B:3C".into()),
            ..Default::default()
        };
        assert_eq!(s.address(), "ws://host/rpc/00:1A:2B:3C");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let raw = r#"{"url": "ws://x/", "transport": {"heartbeatMs": null, "timeoutMs": 250}}"#;
        let s: ConnectionSettings = serde_json::from_str(raw).unwrap();
        assert_eq!(s.url, "ws://x/");
        assert_eq!(s.transport.timeout_ms, 250);
        assert_eq!(s.transport.heartbeat_ms, None);
        assert_eq!(s.transport.max_msg_size, 4_194_304);
        assert!(!s.fail_error_frames);
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(ConnectionSettings::default()).unwrap();
        assert!(v.get("failErrorFrames").is_some());
        assert!(v["transport"].get("maxMsgSize").is_some());
        assert!(v.get("identity").is_none());
    }
}
