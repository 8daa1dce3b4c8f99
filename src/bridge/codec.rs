//! JSON-RPC 2.0 envelope codec.
//!
//! The wire format never transmits the message kind; it is derived from the
//! members present. Parsing accepts only the documented request,
//! notification and response shapes and reports everything else as a
//! [`CodecError`] for the caller to log and discard.

use super::error::{CodecError, CodecResult};
use crate::JSONRPC_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};
use std::fmt;

/// JSON-RPC error code: method not found.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code: invalid params.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error code: internal error.
pub const INTERNAL_ERROR: i64 = -32603;

/// Kind of envelope, inferred from structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Carries `method` and a non-empty `id`
    Request,
    /// Carries `method` without an id
    Notification,
    /// Carries `result` or `error`
    Response,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageKind::Request => "request",
            MessageKind::Notification => "notification",
            MessageKind::Response => "response",
        };
        f.write_str(label)
    }
}

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Correlation id (absent for notifications)
    pub id: Option<String>,
    /// The id travelled as a JSON number and is echoed back as one
    pub numeric_id: bool,
    /// Derived kind
    pub kind: MessageKind,
    /// Method name for requests and notifications
    pub method: Option<String>,
    /// Request parameters
    pub params: Option<Value>,
    /// Successful response payload
    pub result: Option<Value>,
    /// Error response payload
    pub error: Option<Value>,
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id.into()),
            numeric_id: false,
            kind: MessageKind::Request,
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Build a notification envelope.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            numeric_id: false,
            kind: MessageKind::Notification,
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Build a successful response.
    pub fn response(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            numeric_id: false,
            kind: MessageKind::Response,
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error_response(id: Option<String>, error: RpcError) -> Self {
        Self {
            id,
            numeric_id: false,
            kind: MessageKind::Response,
            method: None,
            params: None,
            result: None,
            error: Some(error.into_value()),
        }
    }

    /// Successful reply to this envelope, echoing its id as it was sent.
    pub fn reply(&self, result: Value) -> Self {
        Self {
            id: self.request_id().map(str::to_string),
            numeric_id: self.numeric_id,
            ..Self::response(String::new(), result)
        }
    }

    /// Error reply to this envelope, echoing its id as it was sent.
    pub fn reply_error(&self, error: RpcError) -> Self {
        Self {
            numeric_id: self.numeric_id,
            ..Self::error_response(self.request_id().map(str::to_string), error)
        }
    }

    /// Method name, or the empty string.
    pub fn method_name(&self) -> &str {
        self.method.as_deref().unwrap_or("")
    }

    /// Id when present and non-empty.
    pub fn request_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Structured JSON-RPC error member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Error for a method outside the command vocabulary.
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
            data: None,
        }
    }

    /// Error for a request that could not be executed at all.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: message.into(),
            data: None,
        }
    }

    fn into_value(self) -> Value {
        let mut map = Map::new();
        map.insert("code".to_string(), Value::from(self.code));
        map.insert("message".to_string(), Value::String(self.message));
        if let Some(data) = self.data {
            map.insert("data".to_string(), data);
        }
        Value::Object(map)
    }
}

/// Parse one text frame into an [`Envelope`].
pub fn parse(text: &str) -> CodecResult<Envelope> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| CodecError::InvalidJson(err.to_string()))?;
    from_value(value)
}

/// Classify an already-decoded JSON value.
pub fn from_value(value: Value) -> CodecResult<Envelope> {
    let Value::Object(mut obj) = value else {
        return Err(CodecError::NotAnObject);
    };

    match obj.remove("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        Some(Value::String(version)) => return Err(CodecError::UnsupportedVersion(version)),
        Some(other) => return Err(CodecError::UnsupportedVersion(other.to_string())),
        None => return Err(CodecError::UnsupportedVersion("missing".into())),
    }

    let mut numeric_id = false;
    let id = match obj.remove("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id),
        Some(Value::Number(n)) => {
            numeric_id = true;
            Some(n.to_string())
        }
        Some(other) => {
            return Err(CodecError::InvalidField {
                field: "id",
                detail: format!("expected string or number, got {}", type_name(&other)),
            });
        }
    };

    let method = match obj.remove("method") {
        None => None,
        Some(Value::String(method)) if !method.is_empty() => Some(method),
        Some(Value::String(_)) => {
            return Err(CodecError::InvalidField {
                field: "method",
                detail: "must not be empty".into(),
            });
        }
        Some(other) => {
            return Err(CodecError::InvalidField {
                field: "method",
                detail: format!("expected string, got {}", type_name(&other)),
            });
        }
    };

    let params = obj.remove("params").filter(|v| !v.is_null());
    let result = obj.remove("result");
    let error = obj.remove("error").filter(|v| !v.is_null());

    let kind = match (&method, &result, &error) {
        (Some(_), None, None) => {
            if id.as_deref().is_some_and(|id| !id.is_empty()) {
                MessageKind::Request
            } else {
                MessageKind::Notification
            }
        }
        (Some(_), _, _) => return Err(CodecError::Ambiguous("method alongside result/error")),
        (None, Some(_), Some(_)) => return Err(CodecError::Ambiguous("both result and error")),
        (None, Some(_), None) | (None, None, Some(_)) => MessageKind::Response,
        (None, None, None) => return Err(CodecError::UnrecognizedShape),
    };

    if kind == MessageKind::Response && params.is_some() {
        return Err(CodecError::Ambiguous("params on a response"));
    }

    let id = id.filter(|id| kind != MessageKind::Notification || !id.is_empty());
    Ok(Envelope {
        numeric_id: numeric_id && id.is_some(),
        id,
        kind,
        method,
        params,
        result,
        error,
    })
}

/// Encode an [`Envelope`] as a compact JSON text frame.
pub fn serialize(envelope: &Envelope) -> String {
    to_value(envelope).to_string()
}

/// Encode an [`Envelope`] as a JSON value.
pub fn to_value(envelope: &Envelope) -> Value {
    let mut map = Map::new();
    map.insert("jsonrpc".to_string(), json!(JSONRPC_VERSION));

    if let Some(id) = envelope.id.as_deref().filter(|id| !id.is_empty()) {
        let number = envelope
            .numeric_id
            .then(|| id.parse::<Number>().ok())
            .flatten();
        let id = match number {
            Some(number) => Value::Number(number),
            None => Value::String(id.to_string()),
        };
        map.insert("id".to_string(), id);
    }

    match envelope.kind {
        MessageKind::Request | MessageKind::Notification => {
            if let Some(method) = &envelope.method {
                map.insert("method".to_string(), Value::String(method.clone()));
            }
            if let Some(params) = &envelope.params {
                map.insert("params".to_string(), params.clone());
            }
        }
        MessageKind::Response => match (&envelope.result, &envelope.error) {
            (_, Some(error)) => {
                map.insert("error".to_string(), error.clone());
            }
            (Some(result), None) => {
                map.insert("result".to_string(), result.clone());
            }
            (None, None) => {
                map.insert("result".to_string(), Value::Null);
            }
        },
    }

    Value::Object(map)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
