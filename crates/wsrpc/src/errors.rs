//! Error types for connection operations and connection lifecycles.

use wsrpc_protocol::{ErrorObject, ProtocolError, RequestId};

use crate::transport::TransportError;

/// Failure of a single operation on a connection (a request, a frame
/// delivery, a send).
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An inbound frame could not be parsed or validated.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An outbound message could not be serialized.
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The peer answered with a JSON-RPC error.
    #[error("peer returned error {0}")]
    ReceivedErrorResponse(ErrorObject),

    /// The connection was torn down before the operation completed.
    #[error("connection cancelled")]
    Cancelled,

    /// A request with this id is already waiting for its response.
    #[error("request id {0} is already pending")]
    DuplicateRequestId(RequestId),

    /// The waiter was woken but no response was stored for it.
    #[error("no response stored for request id {0}")]
    MissingResponse(RequestId),
}

/// Why a supervised connection ended abnormally. Returned by
/// [`ConnectionSupervisor::handle`](crate::ConnectionSupervisor::handle)
/// after teardown has completed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The transport failed to open or failed while running.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The connection was cancelled from outside.
    #[error("connection cancelled")]
    Cancelled,

    /// The dispatch loop stopped on a protocol or error-response failure.
    #[error(transparent)]
    Rpc(RpcError),

    /// A supervised task panicked or was aborted unexpectedly.
    #[error("connection task failed: {0}")]
    TaskFailed(String),
}

impl From<RpcError> for ConnectionError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Transport(e) => Self::Transport(e),
            RpcError::Cancelled => Self::Cancelled,
            other => Self::Rpc(other),
        }
    }
}
