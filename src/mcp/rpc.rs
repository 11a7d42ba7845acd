//! JSON-RPC protocol representations and formatting utilities
//!
//! Builds the success and error envelopes shared by every transport, so a reply serializes the
//! same way whether it is pushed or returned inline.

use rust_mcp_sdk::schema::{
    JsonrpcErrorResponse, JsonrpcResultResponse, RequestId, Result as McpResult, RpcError,
};
use serde::Deserialize;
use serde_json::{json, Value};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Loosely typed request; framing is validated by the dispatcher rather than by serde.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn method_name(&self) -> Option<&str> {
        self.method
            .as_deref()
            .map(str::trim)
            .filter(|method| !method.is_empty())
    }
}

/// Decodes just enough of a payload to route it, without validating framing.
pub fn peek_request(payload: &Value) -> Option<JsonRpcRequest> {
    serde_json::from_value(payload.clone()).ok()
}

pub fn is_json_rpc_error(value: &Value) -> bool {
    value.get("error").is_some()
}

pub fn json_rpc_error(id: Option<Value>, code: i32, message: &str) -> Value {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i32,
    message: &str,
    data: Option<Value>,
) -> Value {
    if let Some(request_id) = id.as_ref().and_then(value_to_request_id) {
        let error = RpcError {
            code: i64::from(code),
            data: data.clone(),
            message: message.to_string(),
        };
        let response = JsonrpcErrorResponse::new(error, Some(request_id));
        if let Ok(value) = serde_json::to_value(response) {
            return value;
        }
    }

    let mut error_body = json!({
        "code": code,
        "message": message,
    });
    if let Some(data) = data {
        error_body["data"] = data;
    }
    json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(Value::Null),
        "error": error_body
    })
}

pub fn json_rpc_result(id: Option<Value>, result: Value) -> Value {
    if let Some(request_id) = id.as_ref().and_then(value_to_request_id) {
        if let Some(extra) = result.as_object().cloned() {
            let payload = McpResult {
                meta: None,
                extra: Some(extra),
            };
            let response = JsonrpcResultResponse::new(request_id, payload);
            if let Ok(value) = serde_json::to_value(response) {
                return value;
            }
        }
    }

    json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(Value::Null),
        "result": result
    })
}

pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}

/// Renders a request id as the call identifier handed to operations.
pub fn call_id_from(id: Option<&Value>) -> Option<String> {
    match id? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}
