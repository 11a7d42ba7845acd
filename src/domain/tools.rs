//! Tool listing and invocation over the operation registry
//!
//! `tools/list` enumerates the registry in registration order and `tools/call` runs one
//! operation, folding its outcome into a single text content block.

use std::sync::Arc;

use rust_mcp_sdk::schema::{CallToolResult, ContentBlock, TextContent};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::mcp::rpc::{
    call_id_from, json_rpc_error, json_rpc_error_with_data, json_rpc_result, INTERNAL_ERROR,
    INVALID_PARAMS, METHOD_NOT_FOUND,
};
use crate::registry::{Operation, OperationRegistry};

#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Map<String, Value>,
}

fn is_listable(operation: &Arc<dyn Operation>) -> bool {
    !operation.name().trim().is_empty()
        && !operation.description().trim().is_empty()
        && operation.input_schema().is_object()
}

pub fn build_tools_list(registry: &OperationRegistry) -> Vec<Value> {
    registry
        .iter()
        .filter(|operation| is_listable(operation))
        .map(|operation| {
            json!({
                "name": operation.name(),
                "description": operation.description(),
                "inputSchema": &**operation.input_schema(),
            })
        })
        .collect()
}

/// Text carried by a tool result: strings verbatim, anything else as compact JSON.
pub fn result_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub async fn handle_tools_call(
    registry: &OperationRegistry,
    id: Option<Value>,
    params: Option<Value>,
) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, INVALID_PARAMS, "Invalid params");
    };

    let tool_call: ToolCallParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(err) => {
            return json_rpc_error_with_data(
                id,
                INVALID_PARAMS,
                "Invalid params",
                Some(json!({ "reason": err.to_string() })),
            )
        }
    };

    let Some(operation) = registry.get(&tool_call.name) else {
        return json_rpc_error_with_data(
            id,
            METHOD_NOT_FOUND,
            &format!("Tool not found: {}", tool_call.name),
            Some(json!({ "name": tool_call.name })),
        );
    };

    let call_id = call_id_from(id.as_ref()).unwrap_or_else(|| Uuid::new_v4().to_string());
    match operation.invoke(&call_id, tool_call.arguments).await {
        Ok(value) => {
            let result = CallToolResult {
                content: vec![ContentBlock::from(TextContent::new(
                    result_text(&value),
                    None,
                    None,
                ))],
                is_error: None,
                meta: None,
                structured_content: None,
            };
            match serde_json::to_value(result) {
                Ok(result) => json_rpc_result(id, result),
                Err(err) => json_rpc_error(id, INTERNAL_ERROR, &err.to_string()),
            }
        }
        Err(err) => {
            tracing::error!(
                tool = %tool_call.name,
                call_id = %call_id,
                error = %err,
                "tool invocation failed"
            );
            json_rpc_error_with_data(
                id,
                INTERNAL_ERROR,
                &err.to_string(),
                Some(json!({ "kind": err.kind() })),
            )
        }
    }
}
