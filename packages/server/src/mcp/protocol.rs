//! JSON-RPC 2.0 message types for the MCP tool surface.
//!
//! One JSON object per newline-delimited frame, both directions. Requests
//! without an `id` are notifications and get no response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error: method or tool not found.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error: invalid params.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error: internal error.
pub const INTERNAL_ERROR: i64 = -32603;
/// JSON-RPC error: unparseable frame.
pub const PARSE_ERROR: i64 = -32700;

/// An incoming JSON-RPC request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// True when the frame expects no response.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// An outgoing JSON-RPC response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// The error member of a failed response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// A successful response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// A failed response.
    #[must_use]
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_request_with_id() {
        let request: JsonRpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#,
        )
        .unwrap();
        assert_eq!(request.method, "tools/list");
        assert!(!request.is_notification());
    }

    #[test]
    fn parses_notification_without_id() {
        let request: JsonRpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .unwrap();
        assert!(request.is_notification());
        assert_eq!(request.params, Value::Null);
    }

    #[test]
    fn success_response_omits_error() {
        let response = JsonRpcResponse::success(json!(1), json!({"ok": true}));
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["jsonrpc"], "2.0");
        assert_eq!(encoded["result"]["ok"], true);
        assert!(encoded.get("error").is_none());
    }

    #[test]
    fn failure_response_omits_result() {
        let response = JsonRpcResponse::failure(json!(2), METHOD_NOT_FOUND, "no such method");
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["error"]["code"], METHOD_NOT_FOUND);
        assert!(encoded.get("result").is_none());
    }
}
