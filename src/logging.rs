use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::http::{session_id_from_headers, MCP_SESSION_ID_HEADER};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Logs one summary per request. Push streams are summarized once the stream has opened, so the
/// duration covers the handshake only.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let requested_session = session_id_from_headers(request.headers());
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();

    // Minted sessions only show up on the response.
    let session_id = requested_session
        .or_else(|| {
            response
                .headers()
                .get(MCP_SESSION_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "-".to_string());

    info!(
        method = %method,
        path = %path,
        session_id = %session_id,
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "request summary"
    );

    if status.is_server_error() {
        warn!(
            method = %method,
            path = %path,
            session_id = %session_id,
            "request failed on the server"
        );
    } else if status.is_client_error() && status.as_u16() != 404 {
        warn!(
            method = %method,
            path = %path,
            session_id = %session_id,
            status = status.as_u16(),
            "request rejected"
        );
    }

    response
}
