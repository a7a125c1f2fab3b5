//! Immutable per-connection configuration.

use std::fmt;
use std::sync::Arc;

use wsrpc_core::{ConnectionSettings, DEFAULT_CONNECTION_NAME};
use wsrpc_protocol::MethodRegistry;

use crate::context::ConnectionContext;
use crate::transport::TransportOptions;

/// Handler table type used by connections.
pub type Handlers = MethodRegistry<ConnectionContext>;

/// What the dispatch loop does with an inbound error frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorFramePolicy {
    /// Log a warning and keep going. A request answered with an error stays
    /// pending until teardown or until its caller gives up.
    #[default]
    LogOnly,
    /// Route the error to the waiting request, which then fails with
    /// [`RpcError::ReceivedErrorResponse`](crate::RpcError::ReceivedErrorResponse).
    FailWaiter,
}

/// Configuration for one connection. Shared read-only for its lifetime.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Endpoint URL.
    pub url: String,
    /// Suffix appended verbatim to `url`.
    pub identity: Option<String>,
    /// Connection name used in logs.
    pub name: String,
    /// Include handler error details in error responses.
    pub debug: bool,
    /// Handling of inbound error frames.
    pub error_frames: ErrorFramePolicy,
    /// Transport tuning.
    pub transport: TransportOptions,
    /// Methods the peer may call on this side.
    pub handlers: Arc<Handlers>,
}

impl ConnectionConfig {
    /// Start building a config for `url`.
    pub fn builder(url: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new(url)
    }

    /// Convert loaded settings, attaching the handler table.
    pub fn from_settings(settings: &ConnectionSettings, handlers: Handlers) -> Self {
        Self {
            url: settings.url.clone(),
            identity: settings.identity.clone(),
            name: settings.name.clone(),
            debug: settings.debug,
            error_frames: if settings.fail_error_frames {
                ErrorFramePolicy::FailWaiter
            } else {
                ErrorFramePolicy::LogOnly
            },
            transport: TransportOptions::from_settings(&settings.transport),
            handlers: Arc::new(handlers),
        }
    }

    /// Final address: `url` followed by the identity suffix, if any.
    pub fn address(&self) -> String {
        match &self.identity {
            Some(identity) => format!("{}{identity}", self.url),
            None => self.url.clone(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("identity", &self.identity)
            .field("name", &self.name)
            .field("debug", &self.debug)
            .field("error_frames", &self.error_frames)
            .field("transport", &self.transport)
            .field("handlers", &self.handlers.methods())
            .finish()
    }
}

/// Builder for [`ConnectionConfig`].
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    fn new(url: impl Into<String>) -> Self {
        Self {
            config: ConnectionConfig {
                url: url.into(),
                identity: None,
                name: DEFAULT_CONNECTION_NAME.to_owned(),
                debug: false,
                error_frames: ErrorFramePolicy::default(),
                transport: TransportOptions::default(),
                handlers: Arc::new(Handlers::new()),
            },
        }
    }

    /// Identity suffix appended to the URL.
    #[must_use]
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.config.identity = Some(identity.into());
        self
    }

    /// Connection name used in logs.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Include handler error details in error responses.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Handling of inbound error frames.
    #[must_use]
    pub fn error_frames(mut self, policy: ErrorFramePolicy) -> Self {
        self.config.error_frames = policy;
        self
    }

    /// Transport tuning.
    #[must_use]
    pub fn transport(mut self, transport: TransportOptions) -> Self {
        self.config.transport = transport;
        self
    }

    /// Handler table.
    #[must_use]
    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.config.handlers = Arc::new(handlers);
        self
    }

    /// Finish.
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wsrpc_core::TransportSettings;

    #[test]
    fn builder_defaults() {
        let config = ConnectionConfig::builder("ws://peer/").build();
        assert_eq!(config.name, "ws-connection");
        assert_eq!(config.error_frames, ErrorFramePolicy::LogOnly);
        assert_eq!(config.address(), "ws://peer/");
        assert!(config.handlers.is_empty());
        assert_eq!(config.transport.heartbeat, Some(Duration::from_secs(30)));
    }

    #[test]
    fn identity_is_appended_verbatim() {
        let config = ConnectionConfig::builder("wss://cs.example/ocpp/")
            .identity("CP-0042")
            .build();
        assert_eq!(config.address(), "wss://cs.example/ocpp/CP-0042");
    }

    #[test]
    fn from_settings_maps_every_field() {
        let settings = ConnectionSettings {
            url: "ws://h/".into(),
            identity: Some("x".into()),
            name: "charger".into(),
            debug: true,
            fail_error_frames: true,
            transport: TransportSettings {
                heartbeat_ms: None,
                timeout_ms: 250,
                ..Default::default()
            },
        };
        let mut handlers = Handlers::new();
        crate::handlers::register_defaults(&mut handlers);

        let config = ConnectionConfig::from_settings(&settings, handlers);
        assert_eq!(config.address(), "ws://h/x");
        assert_eq!(config.name, "charger");
        assert!(config.debug);
        assert_eq!(config.error_frames, ErrorFramePolicy::FailWaiter);
        assert_eq!(config.transport.heartbeat, None);
        assert_eq!(config.transport.open_timeout, Duration::from_millis(250));
        assert!(config.handlers.has_method("rpc.ping"));
    }

    #[test]
    fn debug_lists_methods() {
        let mut handlers = Handlers::new();
        crate::handlers::register_defaults(&mut handlers);
        let config = ConnectionConfig::builder("ws://peer/").handlers(handlers).build();
        let out = format!("{config:?}");
        assert!(out.contains("rpc.methods"));
    }
}
