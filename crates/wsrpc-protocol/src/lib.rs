//! # wsrpc-protocol
//!
//! JSON-RPC 2.0 message layer used by the symmetric connection:
//! - [`types`]: requests, notifications, responses, error objects
//! - [`parse`]: parsing and validating inbound responses
//! - [`registry`]: the handler table mapping method names to handlers
//! - [`dispatch`]: running inbound requests/notifications against a registry
//!
//! The crate knows nothing about sockets or connection state; the handler
//! context type is a generic parameter supplied by the caller.

#![deny(unsafe_code)]

pub mod dispatch;
pub mod errors;
pub mod parse;
pub mod registry;
pub mod types;

pub use dispatch::{DispatchReply, DispatchResult, dispatch};
pub use errors::{HandlerError, ProtocolError};
pub use parse::{ParseOptions, ParsedResponse, parse_response};
pub use registry::{FnHandler, MethodHandler, MethodRegistry};
pub use types::{ErrorObject, Notification, Request, RequestId, Response, ResponsePayload};
