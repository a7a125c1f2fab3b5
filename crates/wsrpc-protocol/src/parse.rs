//! Parsing inbound responses.
//!
//! With validation on, a response must be an object carrying
//! `"jsonrpc": "2.0"`, an integer or string `id` (`null` only on errors),
//! and exactly one of `result` / `error`. With validation off, only the
//! members actually needed to route the response are read.

use serde_json::{Map, Value};

use crate::errors::ProtocolError;
use crate::types::{ErrorObject, JSONRPC_VERSION, RequestId, Response, ResponsePayload};

/// Controls for [`parse_response`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseOptions {
    /// Accept a JSON array of responses.
    pub batch: bool,
    /// Check the message against the JSON-RPC 2.0 response schema.
    pub validate: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            batch: true,
            validate: true,
        }
    }
}

/// Result of parsing a response frame.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedResponse {
    /// One response.
    Single(Response),
    /// A batch of responses, in arrival order.
    Batch(Vec<Response>),
}

impl ParsedResponse {
    /// Iterate over the contained responses.
    pub fn into_responses(self) -> Vec<Response> {
        match self {
            Self::Single(r) => vec![r],
            Self::Batch(rs) => rs,
        }
    }
}

/// Parse a response (or batch of responses) from frame text.
pub fn parse_response(text: &str, options: ParseOptions) -> Result<ParsedResponse, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    match value {
        Value::Array(items) => {
            if !options.batch {
                return Err(ProtocolError::BatchNotAllowed);
            }
            if items.is_empty() {
                return Err(ProtocolError::invalid("empty batch"));
            }
            let responses = items
                .into_iter()
                .map(|item| response_from_value(item, options.validate))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ParsedResponse::Batch(responses))
        }
        other => response_from_value(other, options.validate).map(ParsedResponse::Single),
    }
}

/// Convert one JSON value into a [`Response`].
pub fn response_from_value(value: Value, validate: bool) -> Result<Response, ProtocolError> {
    let Value::Object(mut obj) = value else {
        return Err(ProtocolError::invalid("response is not an object"));
    };

    if validate {
        check_version(&obj)?;
    }

    let id = match obj.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => match RequestId::from_value(&raw) {
            Some(id) => Some(id),
            None if validate => return Err(ProtocolError::invalid(format!("invalid id: {raw}"))),
            None => None,
        },
    };

    let result = obj.remove("result");
    let error = obj.remove("error");

    let payload = match (result, error) {
        (Some(_), Some(_)) if validate => {
            return Err(ProtocolError::invalid("both result and error present"));
        }
        (_, Some(error)) => ResponsePayload::Error(error_object(error, validate)?),
        (Some(result), None) => ResponsePayload::Result(result),
        (None, None) if validate => {
            return Err(ProtocolError::invalid("neither result nor error present"));
        }
        (None, None) => ResponsePayload::Result(Value::Null),
    };

    if validate && id.is_none() && matches!(payload, ResponsePayload::Result(_)) {
        return Err(ProtocolError::invalid("success response without id"));
    }

    Ok(Response {
        jsonrpc: JSONRPC_VERSION.to_owned(),
        id,
        payload,
    })
}

fn check_version(obj: &Map<String, Value>) -> Result<(), ProtocolError> {
    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => Ok(()),
        Some(other) => Err(ProtocolError::invalid(format!("unsupported jsonrpc version '{other}'"))),
        None => Err(ProtocolError::invalid("missing jsonrpc version")),
    }
}

fn error_object(value: Value, validate: bool) -> Result<ErrorObject, ProtocolError> {
    if validate {
        let shape_ok = value.get("code").is_some_and(Value::is_i64)
            && value.get("message").is_some_and(Value::is_string);
        if !shape_ok {
            return Err(ProtocolError::invalid("error member needs integer code and string message"));
        }
    }
    let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let data = value.get("data").cloned();
    Ok(ErrorObject {
        code,
        message,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn strict() -> ParseOptions {
        ParseOptions::default()
    }

    fn lenient() -> ParseOptions {
        ParseOptions {
            batch: true,
            validate: false,
        }
    }

    #[test]
    fn parses_success_response() {
        let parsed = parse_response(r#"{"jsonrpc":"2.0","result":"pong","id":"7"}"#, strict()).unwrap();
        let ParsedResponse::Single(resp) = parsed else {
            panic!("expected single");
        };
        assert_eq!(resp.id, Some("7".into()));
        assert_eq!(resp.payload, ResponsePayload::Result(json!("pong")));
    }

    #[test]
    fn parses_error_response_with_null_id() {
        let text = r#"{"jsonrpc":"2.0","error":{"code":-32700,"message":"Parse error"},"id":null}"#;
        let resp = parse_response(text, strict()).unwrap().into_responses().remove(0);
        assert!(resp.is_error());
        assert_eq!(resp.id, None);
    }

    #[test]
    fn strict_rejects_missing_version() {
        let err = parse_response(r#"{"result":1,"id":1}"#, strict()).unwrap_err();
        assert_matches!(err, ProtocolError::InvalidMessage(_));
    }

    #[test]
    fn strict_rejects_both_members() {
        let text = r#"{"jsonrpc":"2.0","result":1,"error":{"code":1,"message":"x"},"id":1}"#;
        assert_matches!(parse_response(text, strict()), Err(ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn strict_rejects_bad_error_shape() {
        let text = r#"{"jsonrpc":"2.0","error":{"code":"x"},"id":1}"#;
        assert_matches!(parse_response(text, strict()), Err(ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn strict_rejects_float_id() {
        let text = r#"{"jsonrpc":"2.0","result":1,"id":1.5}"#;
        assert_matches!(parse_response(text, strict()), Err(ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn lenient_accepts_bare_result() {
        let resp = parse_response(r#"{"result":[1,2],"id":3}"#, lenient())
            .unwrap()
            .into_responses()
            .remove(0);
        assert_eq!(resp.id, Some(RequestId::Number(3)));
        assert_eq!(resp.payload, ResponsePayload::Result(json!([1, 2])));
    }

    #[test]
    fn batches_respect_option() {
        let text = r#"[{"jsonrpc":"2.0","result":1,"id":1},{"jsonrpc":"2.0","result":2,"id":2}]"#;
        let parsed = parse_response(text, strict()).unwrap();
        assert_matches!(&parsed, ParsedResponse::Batch(rs) if rs.len() == 2);

        let no_batch = ParseOptions {
            batch: false,
            validate: true,
        };
        assert_matches!(parse_response(text, no_batch), Err(ProtocolError::BatchNotAllowed));
        assert_matches!(parse_response("[]", strict()), Err(ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn not_json_is_json_error() {
        assert_matches!(parse_response("not json", strict()), Err(ProtocolError::Json(_)));
    }
}
