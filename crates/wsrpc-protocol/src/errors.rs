//! JSON-RPC error codes, handler errors, and parse failures.

use serde_json::Value;

use crate::types::ErrorObject;

// ── Error code constants ────────────────────────────────────────────

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not registered.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;
/// Generic application error raised by a handler.
pub const SERVER_ERROR: i64 = -32000;

/// Error type returned by method handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Unexpected failure inside the handler.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Application error with an explicit code.
    #[error("{message}")]
    Custom {
        /// Numeric error code.
        code: i64,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        data: Option<Value>,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Shorthand for [`HandlerError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Numeric code for this variant.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Internal { .. } => SERVER_ERROR,
            Self::Custom { code, .. } => *code,
        }
    }

    /// Convert to the wire-format error object.
    ///
    /// Internal failure details are only exposed when `debug` is set;
    /// invalid-params messages and custom data are always sent.
    pub fn to_error_object(&self, debug: bool) -> ErrorObject {
        match self {
            Self::InvalidParams { message } => ErrorObject::new(INVALID_PARAMS, "Invalid params")
                .with_data(Value::from(message.as_str())),
            Self::Internal { message } => {
                let obj = ErrorObject::new(SERVER_ERROR, "Server error");
                if debug {
                    obj.with_data(Value::from(message.as_str()))
                } else {
                    obj
                }
            }
            Self::Custom {
                code,
                message,
                data,
            } => ErrorObject {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
        }
    }
}

/// Failure to parse or validate an inbound message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The text is not JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON does not have the shape of a JSON-RPC message.
    #[error("invalid JSON-RPC message: {0}")]
    InvalidMessage(String),

    /// A batch arrived where only single messages are accepted.
    #[error("batch messages are not accepted here")]
    BatchNotAllowed,
}

impl ProtocolError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidMessage(message.into())
    }
}
