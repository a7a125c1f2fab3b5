//! Dispatch of inbound requests and notifications.
//!
//! [`dispatch`] never fails: malformed input becomes a JSON-RPC error
//! response, and notifications produce no response at all.

use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{INVALID_REQUEST, PARSE_ERROR};
use crate::registry::MethodRegistry;
use crate::types::{ErrorObject, JSONRPC_VERSION, RequestId, Response};

/// What to send back after dispatching one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchReply {
    /// Reply to a single request.
    Single(Response),
    /// Replies to the requests of a batch, in request order.
    Batch(Vec<Response>),
}

impl DispatchReply {
    /// Serialize to frame text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Single(r) => serde_json::to_string(r),
            Self::Batch(rs) => serde_json::to_string(rs),
        }
    }
}

/// Outcome of [`dispatch`].
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchResult {
    /// The reply, or `None` when nothing should be sent.
    pub reply: Option<DispatchReply>,
}

impl DispatchResult {
    /// Whether the peer expects a response frame.
    pub fn wanted(&self) -> bool {
        self.reply.is_some()
    }
}

/// Dispatch one inbound frame against `registry`.
pub async fn dispatch<C: ?Sized + Sync>(
    text: &str,
    ctx: &C,
    registry: &MethodRegistry<C>,
    debug: bool,
) -> DispatchResult {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "inbound frame is not JSON");
            let mut err = ErrorObject::new(PARSE_ERROR, "Parse error");
            if debug {
                err = err.with_data(Value::from(e.to_string()));
            }
            return DispatchResult {
                reply: Some(DispatchReply::Single(Response::error(None, err))),
            };
        }
    };

    let reply = match value {
        Value::Array(items) if items.is_empty() => Some(DispatchReply::Single(invalid_request(
            None,
            "empty batch",
        ))),
        Value::Array(items) => {
            let mut responses = Vec::with_capacity(items.len());
            for item in items {
                if let Some(resp) = dispatch_one(item, ctx, registry, debug).await {
                    responses.push(resp);
                }
            }
            (!responses.is_empty()).then_some(DispatchReply::Batch(responses))
        }
        other => dispatch_one(other, ctx, registry, debug)
            .await
            .map(DispatchReply::Single),
    };

    DispatchResult { reply }
}

/// Parsed shape of one call.
struct Call {
    method: String,
    params: Option<Value>,
    /// `None` for notifications; `Some(None)` for a request with a null id.
    id: Option<Option<RequestId>>,
}

async fn dispatch_one<C: ?Sized + Sync>(
    value: Value,
    ctx: &C,
    registry: &MethodRegistry<C>,
    debug: bool,
) -> Option<Response> {
    let call = match parse_call(value) {
        Ok(call) => call,
        Err(resp) => return Some(resp),
    };

    match call.id {
        None => {
            debug!(method = %call.method, "dispatching notification");
            let _ = registry.call(&call.method, call.params, ctx, debug).await;
            None
        }
        Some(id) => {
            debug!(method = %call.method, id = ?id, "dispatching request");
            let resp = match registry.call(&call.method, call.params, ctx, debug).await {
                Ok(result) => Response::success(id, result),
                Err(err) => Response::error(id, err),
            };
            Some(resp)
        }
    }
}

fn parse_call(value: Value) -> Result<Call, Response> {
    let Value::Object(mut obj) = value else {
        return Err(invalid_request(None, "request is not an object"));
    };

    let id = match obj.remove("id") {
        None => None,
        Some(Value::Null) => Some(None),
        Some(raw) => match RequestId::from_value(&raw) {
            Some(id) => Some(Some(id)),
            None => return Err(invalid_request(None, "invalid id")),
        },
    };
    let reply_id = id.clone().flatten();

    if !has_version(&obj) {
        return Err(invalid_request(reply_id, "missing or unsupported jsonrpc version"));
    }

    let Some(Value::String(method)) = obj.remove("method") else {
        return Err(invalid_request(reply_id, "method must be a string"));
    };

    let params = match obj.remove("params") {
        None => None,
        Some(p @ (Value::Array(_) | Value::Object(_))) => Some(p),
        Some(_) => return Err(invalid_request(reply_id, "params must be an array or object")),
    };

    Ok(Call { method, params, id })
}

fn has_version(obj: &Map<String, Value>) -> bool {
    obj.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION)
}

fn invalid_request(id: Option<RequestId>, reason: &str) -> Response {
    debug!(reason, "invalid request");
    Response::error(
        id,
        ErrorObject::new(INVALID_REQUEST, "Invalid Request").with_data(Value::from(reason)),
    )
}
