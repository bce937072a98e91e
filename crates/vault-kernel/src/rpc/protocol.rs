//! JSON-RPC 2.0 message shapes and reserved error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Inbound JSON-RPC request. Absence of `id` marks it a notification: no
/// response is ever sent for it.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Params as a named-argument object. Array-shaped params are rewrapped
    /// under `args`, per the wire contract.
    pub fn params_object(&self) -> Value {
        match &self.params {
            Some(Value::Array(items)) => serde_json::json!({ "args": items }),
            Some(other) => other.clone(),
            None => Value::Object(Default::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Outbound JSON-RPC message: a successful response, an error response, or
/// an unsolicited `trigger_event` request (no `id` reply is expected for the
/// latter, so it reuses the request shape with a synthetic id).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RpcMessage {
    Response {
        jsonrpc: &'static str,
        result: Value,
        id: Value,
    },
    ErrorResponse {
        jsonrpc: &'static str,
        error: RpcError,
        id: Value,
    },
    Event {
        jsonrpc: &'static str,
        method: &'static str,
        params: Value,
        id: Value,
    },
}

impl RpcMessage {
    pub fn success(id: Value, result: Value) -> Self {
        RpcMessage::Response { jsonrpc: "2.0", result, id }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        RpcMessage::ErrorResponse {
            jsonrpc: "2.0",
            error: RpcError { code, message: message.into(), data },
            id,
        }
    }

    /// An outbound `trigger_event` notification, per the kernel's wire
    /// contract for events the UI did not ask for.
    pub fn trigger_event(event_type: &str, scope: &str, data: Value, timestamp: f64) -> Self {
        RpcMessage::Event {
            jsonrpc: "2.0",
            method: "trigger_event",
            params: serde_json::json!({
                "event_type": event_type,
                "scope": scope,
                "data": data,
                "timestamp": timestamp,
            }),
            id: Value::Null,
        }
    }
}
