//! Server-Sent Events transport
//!
//! `GET /sse` opens a session and announces the companion `POST /messages/` URL in an `endpoint`
//! event. Replies to requests posted there come back on the event stream as bare `data:` frames.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use futures::{stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::http::{
    disable_buffering, requested_session_id, resolve::resolve_session, rpc_response,
    session_error_response, SessionGuard, SessionQuery, PUSH_BUFFER,
};
use crate::mcp::rpc::{json_rpc_error, PARSE_ERROR};
use crate::session::{PushFrame, Transport};
use crate::AppState;

pub const MESSAGES_PATH: &str = "/messages/";

pub fn endpoint_url(session_id: &str) -> String {
    format!("{MESSAGES_PATH}?session_id={session_id}")
}

fn encode_frame(frame: PushFrame) -> Event {
    match frame {
        PushFrame::Message(message) => Event::default().data(message.to_string()),
        PushFrame::Ping => Event::default().event("ping").data("{}"),
    }
}

pub async fn sse_connect(State(state): State<AppState>) -> Response {
    let session_id = state.sessions.open(Transport::Sse);
    let (sender, receiver) = mpsc::channel(PUSH_BUFFER);
    let channel = match state.sessions.bind(&session_id, sender) {
        Ok(channel) => channel,
        Err(err) => {
            state.sessions.close(&session_id);
            return AppError::internal(err.to_string()).into_response();
        }
    };
    let guard = SessionGuard::new(state.sessions.clone(), session_id.clone(), channel);

    let sessions = state.sessions.clone();
    let ping_session = session_id.clone();
    let ping_delay = state.options.sse_ping_delay;
    tokio::spawn(async move {
        tokio::time::sleep(ping_delay).await;
        if !sessions.deliver(&ping_session, PushFrame::Ping) {
            debug!(session_id = %ping_session, "sse ping failed, closing session");
            sessions.close(&ping_session);
        }
    });

    let endpoint = Event::default()
        .event("endpoint")
        .data(endpoint_url(&session_id))
        .id(session_id);
    let frames = ReceiverStream::new(receiver).map(move |frame| {
        let _guard = &guard;
        Ok::<_, Infallible>(encode_frame(frame))
    });
    let events = stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(frames);

    disable_buffering(Sse::new(events).into_response())
}

/// `POST /messages`: resolves the target session, dispatches, and delivers the reply through the
/// session's own transport.
pub async fn post_message(
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

    let requested = requested_session_id(&headers, &query);
    let session = match resolve_session(
        &state.sessions,
        requested.as_deref(),
        state.options.session_fallback,
    ) {
        Ok(session) => {
            state.sessions.touch(&session.id);
            session
        }
        Err(err) => {
            return session_error_response(payload.get("id").cloned(), err, requested.as_deref())
        }
    };

    let Some(reply) = state.dispatcher.dispatch(payload, Some(session.id.as_str())).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    match session.transport {
        Transport::Sse => {
            if state
                .sessions
                .deliver(&session.id, PushFrame::Message(reply.clone()))
            {
                StatusCode::ACCEPTED.into_response()
            } else {
                warn!(session_id = %session.id, "sse push failed, replying inline");
                rpc_response(StatusCode::OK, reply)
            }
        }
        Transport::Stream => rpc_response(StatusCode::OK, reply),
    }
}
