//! HTTP transport layer for the Model Context Protocol
//!
//! Hosts the SSE and streamable transports, the session resolution used by `POST /messages`,
//! and the plain REST and status endpoints.

pub mod handlers;
pub mod resolve;
pub mod sse;
pub mod stream;

use std::fmt::Display;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::mcp::rpc::{json_rpc_error_with_data, INVALID_REQUEST};
use crate::session::{ChannelId, SessionTable};

pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";
pub const LEGACY_SESSION_ID_HEADER: &str = "x-session-id";

/// Bound on frames queued for one client before pushes start failing.
pub const PUSH_BUFFER: usize = 64;

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id_camel: Option<String>,
}

pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    [MCP_SESSION_ID_HEADER, LEGACY_SESSION_ID_HEADER]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Session id from the query string first, then from the recognized headers.
pub fn requested_session_id(headers: &HeaderMap, query: &SessionQuery) -> Option<String> {
    query
        .session_id
        .as_deref()
        .or(query.session_id_camel.as_deref())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| session_id_from_headers(headers))
}

pub fn rpc_response(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

/// 400 reply carrying an Invalid Request envelope that explains the session problem.
pub fn session_error_response(
    request_id: Option<Value>,
    reason: impl Display,
    session_id: Option<&str>,
) -> Response {
    let reason = reason.to_string();
    rpc_response(
        StatusCode::BAD_REQUEST,
        json_rpc_error_with_data(
            request_id,
            INVALID_REQUEST,
            &format!("Invalid Request: {reason}"),
            Some(json!({ "reason": reason, "sessionId": session_id })),
        ),
    )
}

pub fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    response
}

pub fn disable_buffering(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert("cache-control", HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// Releases a session when its push stream is dropped, i.e. when the client goes away.
pub struct SessionGuard {
    sessions: SessionTable,
    session_id: String,
    channel: ChannelId,
}

impl SessionGuard {
    pub fn new(sessions: SessionTable, session_id: String, channel: ChannelId) -> Self {
        Self {
            sessions,
            session_id,
            channel,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.sessions.release(&self.session_id, self.channel) {
            tracing::debug!(session_id = %self.session_id, "push stream dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn query_parameter_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(MCP_SESSION_ID_HEADER, HeaderValue::from_static("from-header"));
        let query = SessionQuery {
            session_id: Some("from-query".to_string()),
            session_id_camel: None,
        };

        assert_eq!(
            requested_session_id(&headers, &query).as_deref(),
            Some("from-query")
        );
        assert_eq!(
            requested_session_id(&headers, &SessionQuery::default()).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn legacy_header_and_blank_values() {
        let mut headers = HeaderMap::new();
        headers.insert(MCP_SESSION_ID_HEADER, HeaderValue::from_static("  "));
        headers.insert(LEGACY_SESSION_ID_HEADER, HeaderValue::from_static("legacy"));

        assert_eq!(session_id_from_headers(&headers).as_deref(), Some("legacy"));
        assert_eq!(session_id_from_headers(&HeaderMap::new()), None);
    }
}
