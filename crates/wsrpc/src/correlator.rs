//! Outgoing request correlation: send a request, suspend until the response
//! with the same id arrives.

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use wsrpc_protocol::{Request, RequestId};

use crate::context::{ConnectionContext, Slot};
use crate::errors::RpcError;

/// Removes the pending entry and any stored slot for its id when the wait
/// ends, however it ends.
struct PendingGuard<'a> {
    ctx: &'a ConnectionContext,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.ctx.table.lock();
        let _ = table.pending.remove(&self.id);
        let _ = table.responses.remove(&self.id);
    }
}

impl ConnectionContext {
    /// Send `request` and wait for the response carrying its id.
    ///
    /// Responses are matched by id only, so concurrent callers may be
    /// answered in any order. Teardown while waiting yields
    /// [`RpcError::Cancelled`]. Dropping the returned future abandons the
    /// wait and forgets the id.
    pub async fn send_and_wait(&self, request: Request) -> Result<Value, RpcError> {
        let id = request.id.clone();
        let text = serde_json::to_string(&request)?;

        let mut signal = self.register_pending(&id)?;
        let guard = PendingGuard {
            ctx: self,
            id: id.clone(),
        };

        debug!(%id, method = %request.method, "sending request");
        self.send_text(text).await?;

        let woken = tokio::select! {
            biased;
            woken = &mut signal => woken.is_ok(),
            () = self.cancel.cancelled() => false,
        };
        if !woken || self.cancel.is_cancelled() {
            debug!(%id, "request released by teardown");
            return Err(RpcError::Cancelled);
        }

        let slot = self.table.lock().responses.remove(&id);
        drop(guard);
        match slot {
            Some(Slot::Result(value)) => Ok(value),
            Some(Slot::Error(err)) => Err(RpcError::ReceivedErrorResponse(err)),
            None => Err(RpcError::MissingResponse(id)),
        }
    }

    /// Allocate the next request id and call `method` on the peer.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let request = Request::new(self.next_request_id(), method, params);
        self.send_and_wait(request).await
    }

    fn register_pending(&self, id: &RequestId) -> Result<oneshot::Receiver<()>, RpcError> {
        let mut table = self.table.lock();
        if self.cancel.is_cancelled() {
            return Err(RpcError::Cancelled);
        }
        if table.pending.contains_key(id) {
            return Err(RpcError::DuplicateRequestId(id.clone()));
        }
        // a stale slot from an unregistered delivery must not answer this request
        let _ = table.responses.remove(id);
        let (tx, rx) = oneshot::channel();
        let _ = table.pending.insert(id.clone(), tx);
        Ok(rx)
    }
}
