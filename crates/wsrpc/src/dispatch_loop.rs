//! Inbound frame loop: routes responses to waiting requests and runs
//! incoming requests and notifications against the handler table.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument, warn};
use wsrpc_protocol::{ProtocolError, dispatch};

use crate::config::ErrorFramePolicy;
use crate::context::ConnectionContext;
use crate::errors::RpcError;
use crate::transport::{Frame, FrameSource};

/// How an inbound text frame is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FrameKind {
    /// An error response (or a batch of responses containing one).
    Error,
    /// A success response (or a batch of them).
    Response,
    /// A request, notification, or anything else for the handler table.
    Call,
}

fn is_response_shaped(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.contains_key("result") || obj.contains_key("error"))
}

fn has_error(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| obj.contains_key("error"))
}

/// Classify a text frame by shape. Invalid JSON is a protocol error.
pub(crate) fn classify(text: &str) -> Result<FrameKind, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = match &value {
        Value::Object(_) if has_error(&value) => FrameKind::Error,
        Value::Object(obj) if obj.contains_key("result") => FrameKind::Response,
        Value::Array(items) if !items.is_empty() && items.iter().all(is_response_shaped) => {
            if items.iter().any(has_error) {
                FrameKind::Error
            } else {
                FrameKind::Response
            }
        }
        _ => FrameKind::Call,
    };
    Ok(kind)
}

/// Consume inbound frames until the peer closes, the transport ends, or a
/// frame fails to parse.
///
/// Returns `Ok(())` on close, transport error frame, or end of stream.
#[instrument(skip_all, fields(connection = %ctx.name()))]
pub async fn run_dispatch_loop(
    ctx: Arc<ConnectionContext>,
    mut source: Box<dyn FrameSource>,
) -> Result<(), RpcError> {
    loop {
        let frame = match source.next_frame().await? {
            Some(frame) => frame,
            None => {
                debug!("inbound stream ended");
                return Ok(());
            }
        };
        match frame {
            Frame::Text(text) => handle_text(&ctx, &text).await?,
            Frame::Binary(data) => {
                debug!(len = data.len(), "binary frame ignored");
            }
            Frame::Close(code) => {
                debug!(?code, "peer closed the connection");
                return Ok(());
            }
            Frame::Error(reason) => {
                warn!(%reason, "transport error frame, stopping");
                return Ok(());
            }
        }
    }
}

async fn handle_text(ctx: &ConnectionContext, text: &str) -> Result<(), RpcError> {
    match classify(text)? {
        FrameKind::Error => match ctx.config().error_frames {
            ErrorFramePolicy::LogOnly => log_error_frame(ctx, text)?,
            ErrorFramePolicy::FailWaiter => ctx.deliver_error(text)?,
        },
        FrameKind::Response => {
            debug!("response frame");
            ctx.deliver_response(text)?;
        }
        FrameKind::Call => {
            let config = ctx.config();
            let result = dispatch(text, ctx, config.handlers.as_ref(), config.debug).await;
            if let Some(reply) = result.reply {
                ctx.send_text(reply.to_json()?).await?;
            } else {
                debug!("notification handled, no reply");
            }
        }
    }
    Ok(())
}

/// Error frames are not correlated under [`ErrorFramePolicy::LogOnly`]:
/// the error is logged and its request stays pending. Success elements of a
/// mixed batch are still delivered.
fn log_error_frame(ctx: &ConnectionContext, text: &str) -> Result<(), RpcError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::from)?;
    match value {
        Value::Array(items) => {
            let (errors, results): (Vec<Value>, Vec<Value>) =
                items.into_iter().partition(has_error);
            for err in &errors {
                warn!(id = %err["id"], error = %err["error"], "peer returned error response");
            }
            if !results.is_empty() {
                ctx.deliver_response(&Value::Array(results).to_string())?;
            }
        }
        other => {
            warn!(id = %other["id"], error = %other["error"], "peer returned error response");
        }
    }
    Ok(())
}
