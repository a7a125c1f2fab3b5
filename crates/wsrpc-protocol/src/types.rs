//! JSON-RPC 2.0 wire-format types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

fn version() -> String {
    JSONRPC_VERSION.to_owned()
}

/// Request identifier: an integer or a string.
///
/// `7` and `"7"` are different ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
}

impl RequestId {
    /// Convert a JSON value into an id, if it has a valid id shape.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Outgoing call that expects a matched response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Always `"2.0"`.
    #[serde(default = "version")]
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Optional parameters (array or object).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Sender-chosen id, unique among in-flight requests on a connection.
    pub id: RequestId,
}

impl Request {
    /// Build a request.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: version(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

/// Outgoing call that expects no response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Always `"2.0"`.
    #[serde(default = "version")]
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Optional parameters (array or object).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Build a notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: version(),
            method: method.into(),
            params,
        }
    }
}

/// Error member of an error response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Build an error object without data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Either the `result` or the `error` member of a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    /// Successful result.
    Result(Value),
    /// Error object.
    Error(ErrorObject),
}

/// Response to a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Always `"2.0"`.
    #[serde(default = "version")]
    pub jsonrpc: String,
    /// Id of the request being answered; `null` when it could not be determined.
    pub id: Option<RequestId>,
    /// Result or error.
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl Response {
    /// Build a success response.
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: version(),
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    /// Build an error response.
    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: version(),
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    /// Whether this is an error response.
    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = Request::new("7", "ping", None);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, json!({"jsonrpc": "2.0", "method": "ping", "id": "7"}));
    }

    #[test]
    fn numeric_and_string_ids_differ() {
        let n: RequestId = 7.into();
        let s: RequestId = "7".into();
        assert_ne!(n, s);
        assert_eq!(n.to_string(), s.to_string());
        assert_eq!(serde_json::to_value(&n).unwrap(), json!(7));
        assert_eq!(serde_json::to_value(&s).unwrap(), json!("7"));
    }

    #[test]
    fn id_from_value_rejects_other_shapes() {
        assert_eq!(RequestId::from_value(&json!(3)), Some(RequestId::Number(3)));
        assert_eq!(RequestId::from_value(&json!("a")), Some("a".into()));
        assert_eq!(RequestId::from_value(&json!(1.5)), None);
        assert_eq!(RequestId::from_value(&json!(null)), None);
        assert_eq!(RequestId::from_value(&json!([1])), None);
    }

    #[test]
    fn notification_has_no_id() {
        let n = Notification::new("tick", Some(json!([1, 2])));
        let v = serde_json::to_value(&n).unwrap();
        assert!(v.get("id").is_none());
        assert_eq!(v["params"], json!([1, 2]));
    }

    #[test]
    fn success_response_flattens_result() {
        let resp = Response::success(Some(1.into()), json!("pong"));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v, json!({"jsonrpc": "2.0", "id": 1, "result": "pong"}));
        assert!(!resp.is_error());
    }

    #[test]
    fn error_response_with_null_id() {
        let resp = Response::error(None, ErrorObject::new(-32700, "Parse error"));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["id"], Value::Null);
        assert_eq!(v["error"]["code"], -32700);
        assert!(v["error"].get("data").is_none());
        assert!(v.get("result").is_none());
    }

    #[test]
    fn error_object_display() {
        let e = ErrorObject::new(-32601, "Method not found").with_data(json!("nope"));
        assert_eq!(e.to_string(), "[-32601] Method not found");
        assert_eq!(e.data, Some(json!("nope")));
    }
}
