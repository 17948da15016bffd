//! Request/response envelopes and protocol-level error codes.
//!
//! The wire format is a JSON-RPC-style message pair: a request carries an
//! optional correlation `id`, an `operation` name, and free-form `arguments`;
//! a response carries the echoed `id` and exactly one of `result` or `error`.
//! A request without an `id` is a notification and produces no response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parse error: the body was not valid JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Invalid request: the JSON did not have the envelope shape.
pub const INVALID_REQUEST: i64 = -32600;
/// Method not found: unknown (or disabled) operation name.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid params: arguments rejected by the operation's schema.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal error: the request could not be serviced at all.
pub const INTERNAL_ERROR: i64 = -32603;
/// Transport-level rejection (e.g. HTTP method not allowed on an endpoint).
pub const METHOD_NOT_ALLOWED: i64 = -32000;
/// Missing or unusable credential for an operation that requires one.
pub const AUTH_REQUIRED: i64 = -32001;

/// One inbound protocol request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEnvelope {
    /// Correlation id, echoed back unchanged. Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Name of the operation to dispatch.
    pub operation: String,
    /// Operation arguments, validated against the descriptor's schema.
    #[serde(default = "default_arguments")]
    pub arguments: Value,
}

fn default_arguments() -> Value {
    Value::Object(serde_json::Map::new())
}

impl RequestEnvelope {
    /// Whether this request is a notification (no response expected).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Structured protocol-level error carried in a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// One outbound protocol response: exactly one of `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl ResponseEnvelope {
    /// Success response echoing the request id.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Envelope-level error response echoing the request id.
    pub fn error(id: Option<Value>, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}
