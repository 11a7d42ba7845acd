//! Axum HTTP handlers for status reporting and direct operation calls
//!
//! `POST /tools/{service}/{operation}` runs an operation outside JSON-RPC and returns its raw
//! result, for integrations that do not speak MCP.

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::errors::AppError;
use crate::registry::full_name;
use crate::session::LiveCounts;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: &'static str,
    pub version: &'static str,
    pub sessions: LiveCounts,
}

#[derive(Debug, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.sessions.live_counts(),
    })
}

pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolSummary>> {
    let registry = state.dispatcher.registry().snapshot();
    Json(
        registry
            .iter()
            .map(|operation| ToolSummary {
                name: operation.name().to_string(),
                description: operation.description().to_string(),
            })
            .collect(),
    )
}

pub async fn invoke_operation(
    State(state): State<AppState>,
    Path((service, operation)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let name = full_name(&service, &operation);
    let registry = state.dispatcher.registry().snapshot();
    let target = registry.get(&name).ok_or_else(|| {
        AppError::not_found(
            "operation_not_found",
            format!("unknown operation {name}"),
            json!({ "name": name }),
        )
    })?;

    let args = parse_arguments(&body)?;
    let call_id = Uuid::new_v4().to_string();
    tracing::info!(operation = %name, call_id = %call_id, "direct operation call");

    let result = target.invoke(&call_id, args).await?;
    Ok(Json(result))
}

fn parse_arguments(body: &[u8]) -> Result<Map<String, Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(args)) => Ok(args),
        Ok(_) => Err(AppError::bad_request(
            "invalid_arguments",
            "request body must be a JSON object",
        )),
        Err(err) => Err(AppError::bad_request(
            "invalid_json",
            format!("request body is not valid JSON: {err}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_means_no_arguments() {
        assert_eq!(parse_arguments(b"").expect("empty body"), Map::new());
        assert_eq!(parse_arguments(b"  \n").expect("blank body"), Map::new());
    }

    #[test]
    fn body_must_be_an_object() {
        let err = parse_arguments(b"[1]").expect_err("array rejected");
        assert!(err.to_string().contains("bad request"));

        let err = parse_arguments(b"{").expect_err("broken json rejected");
        assert!(err.to_string().contains("bad request"));
    }
}
