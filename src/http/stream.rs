//! Streamable HTTP transport
//!
//! One path, three verbs: `GET /stream` opens an NDJSON push channel, `POST /stream` carries
//! JSON-RPC calls, and `DELETE /stream` ends a session. `initialize` always starts a new session;
//! every other call must name an existing one through `Mcp-Session-Id`.

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::http::{
    disable_buffering, requested_session_id, rpc_response, session_error_response,
    session_id_from_headers, with_session_header, SessionGuard, SessionQuery, PUSH_BUFFER,
};
use crate::mcp::rpc::{
    is_json_rpc_error, json_rpc_error, json_rpc_error_with_data, peek_request, INVALID_REQUEST,
    PARSE_ERROR,
};
use crate::session::{PushFrame, SessionError, Transport};
use crate::AppState;

pub const STREAM_PATH: &str = "/stream";
const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
const EVENT_STREAM: &str = "text/event-stream";
const JSON: &str = "application/json";
const WRONG_TRANSPORT: &str = "session does not use the streamable transport";

fn ndjson_line(value: &Value) -> Bytes {
    let mut line = value.to_string();
    line.push('\n');
    Bytes::from(line)
}

fn encode_frame(frame: PushFrame) -> Bytes {
    match frame {
        PushFrame::Message(message) => ndjson_line(&message),
        PushFrame::Ping => ndjson_line(&json!({ "type": "ping" })),
    }
}

/// True when the `Accept` header ranks `text/event-stream` above `application/json`, by
/// q-value first and listing order second.
pub fn prefers_event_stream(headers: &HeaderMap) -> bool {
    let Some(accept) = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };

    let mut event_stream: Option<(f32, usize)> = None;
    let mut json: Option<(f32, usize)> = None;
    for (position, range) in accept.split(',').enumerate() {
        let mut parts = range.split(';');
        let media_type = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let quality = parts
            .filter_map(|param| param.trim().strip_prefix("q="))
            .find_map(|value| value.trim().parse::<f32>().ok())
            .unwrap_or(1.0);

        let slot = match media_type.as_str() {
            EVENT_STREAM => &mut event_stream,
            JSON => &mut json,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some((quality, position));
        }
    }

    match (event_stream, json) {
        (Some((quality, _)), _) if quality <= 0.0 => false,
        (Some(_), None) => true,
        (Some((stream_q, stream_pos)), Some((json_q, json_pos))) => {
            stream_q > json_q || (stream_q == json_q && stream_pos < json_pos)
        }
        (None, _) => false,
    }
}

pub async fn stream_connect(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session_id = match session_id_from_headers(&headers) {
        Some(session_id) => match state.sessions.lookup(&session_id) {
            Some(info) if info.transport == Transport::Stream => session_id,
            Some(_) => {
                return session_error_response(None, WRONG_TRANSPORT, Some(session_id.as_str()))
            }
            None => {
                return session_error_response(
                    None,
                    SessionError::NotFound(session_id.clone()),
                    Some(session_id.as_str()),
                )
            }
        },
        None => state.sessions.open(Transport::Stream),
    };

    let (sender, receiver) = mpsc::channel(PUSH_BUFFER);
    let channel = match state.sessions.bind(&session_id, sender) {
        Ok(channel) => channel,
        Err(err @ SessionError::AlreadyBound(_)) => {
            return rpc_response(
                StatusCode::CONFLICT,
                json_rpc_error_with_data(
                    None,
                    INVALID_REQUEST,
                    &format!("Invalid Request: {err}"),
                    Some(json!({ "reason": err.to_string(), "sessionId": session_id })),
                ),
            )
        }
        Err(err) => return AppError::internal(err.to_string()).into_response(),
    };
    let guard = SessionGuard::new(state.sessions.clone(), session_id.clone(), channel);

    let sessions = state.sessions.clone();
    let ping_session = session_id.clone();
    let ping_interval = state.options.stream_ping_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !sessions.deliver(&ping_session, PushFrame::Ping) {
                debug!(session_id = %ping_session, "stream ping failed, closing session");
                sessions.close(&ping_session);
                break;
            }
        }
    });

    let endpoint = ndjson_line(&json!({
        "type": "endpoint",
        "endpoint": STREAM_PATH,
        "sessionId": session_id,
    }));
    let frames = ReceiverStream::new(receiver).map(move |frame| {
        let _guard = &guard;
        Ok::<_, Infallible>(encode_frame(frame))
    });
    let lines = stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(frames);

    let mut response = Body::from_stream(lines).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(NDJSON_CONTENT_TYPE),
    );
    with_session_header(disable_buffering(response), &session_id)
}

pub async fn stream_message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return rpc_response(
                StatusCode::BAD_REQUEST,
                json_rpc_error(None, PARSE_ERROR, "Parse error"),
            )
        }
    };

    let is_initialize = peek_request(&payload)
        .and_then(|request| request.method_name().map(|method| method == "initialize"))
        .unwrap_or(false);

    let session_id = if is_initialize {
        state.sessions.open(Transport::Stream)
    } else {
        let request_id = payload.get("id").cloned();
        let Some(session_id) = requested_session_id(&headers, &query) else {
            return session_error_response(request_id, "Mcp-Session-Id header is required", None);
        };
        match state.sessions.lookup(&session_id) {
            Some(info) if info.transport == Transport::Stream => {
                state.sessions.touch(&session_id);
                session_id
            }
            Some(_) => {
                return session_error_response(
                    request_id,
                    WRONG_TRANSPORT,
                    Some(session_id.as_str()),
                )
            }
            None => {
                return session_error_response(
                    request_id,
                    SessionError::NotFound(session_id.clone()),
                    Some(session_id.as_str()),
                )
            }
        }
    };

    let Some(reply) = state.dispatcher.dispatch(payload, Some(session_id.as_str())).await else {
        return with_session_header(StatusCode::ACCEPTED.into_response(), &session_id);
    };

    if is_initialize && is_json_rpc_error(&reply) {
        state.sessions.close(&session_id);
        return rpc_response(StatusCode::OK, reply);
    }

    if prefers_event_stream(&headers)
        && state
            .sessions
            .deliver(&session_id, PushFrame::Message(reply.clone()))
    {
        return with_session_header(StatusCode::ACCEPTED.into_response(), &session_id);
    }

    with_session_header(rpc_response(StatusCode::OK, reply), &session_id)
}

pub async fn stream_terminate(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_id_from_headers(&headers) else {
        return AppError::bad_request(
            "missing_session_id",
            "Mcp-Session-Id header is required",
        )
        .into_response();
    };

    if state.sessions.close(&session_id) {
        info!(session_id = %session_id, "session terminated by client");
    } else {
        debug!(session_id = %session_id, "terminate for unknown session");
    }

    (
        StatusCode::OK,
        Json(json!({ "message": "Session terminated" })),
    )
        .into_response()
}
