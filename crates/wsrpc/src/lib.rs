//! # wsrpc
//!
//! Symmetric JSON-RPC over one persistent websocket. Both ends call and
//! answer over the same socket.
//!
//! - [`ConnectionContext`]: pending requests, response slots, background tasks, side data
//! - [`ConnectionContext::send_and_wait`]: id-based request/response correlation
//! - [`dispatch_loop`]: inbound frame routing, in arrival order
//! - [`ConnectionSupervisor`]: connect, run, and guaranteed teardown
//! - [`transport`]: framed duplex transport with websocket and in-memory implementations

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod correlator;
pub mod dispatch_loop;
pub mod errors;
pub mod handlers;
pub mod heartbeat;
pub mod supervisor;
pub mod transport;

pub use config::{ConnectionConfig, ConnectionConfigBuilder, ErrorFramePolicy, Handlers};
pub use context::{ConnectionContext, ShutdownReport, TaskHandle};
pub use errors::{ConnectionError, RpcError};
pub use handlers::{ContextFn, register_defaults};
pub use supervisor::{
    BackgroundOp, ConnectionSupervisor, SupervisorControl, SupervisorState, background,
};
pub use transport::{
    Connector, MemoryConnector, MemoryPeer, TransportError, TransportOptions, WebSocketConnector,
};
pub use wsrpc_protocol::{ErrorObject, HandlerError, Notification, Request, RequestId, Response};
