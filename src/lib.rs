use std::{sync::Arc, time::Duration};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod catalogue;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod registry;
pub mod session;

use config::{Config, DEFAULT_SSE_PING_SECS, DEFAULT_STREAM_PING_SECS};
use mcp::server::Dispatcher;
use registry::{OperationRegistry, RegistryHandle};
use session::SessionTable;

/// Transport tuning shared by the HTTP adapters.
#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    /// Route `POST /messages` without a session id to the newest live connection.
    pub session_fallback: bool,
    pub stream_ping_interval: Duration,
    pub sse_ping_delay: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            session_fallback: false,
            stream_ping_interval: Duration::from_secs(DEFAULT_STREAM_PING_SECS),
            sse_ping_delay: Duration::from_secs(DEFAULT_SSE_PING_SECS),
        }
    }
}

impl From<&Config> for GatewayOptions {
    fn from(config: &Config) -> Self {
        Self {
            session_fallback: config.session_fallback,
            stream_ping_interval: config.stream_ping_interval,
            sse_ping_delay: config.sse_ping_delay,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionTable,
    pub dispatcher: Arc<Dispatcher>,
    pub options: GatewayOptions,
}

impl AppState {
    pub fn new(
        sessions: SessionTable,
        registry: OperationRegistry,
        options: GatewayOptions,
    ) -> Self {
        let registry = Arc::new(RegistryHandle::new(registry));
        Self {
            dispatcher: Arc::new(Dispatcher::new(registry, sessions.clone())),
            sessions,
            options,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(http::handlers::health))
        .route("/tools", get(http::handlers::list_tools))
        .route(
            "/tools/{service}/{operation}",
            post(http::handlers::invoke_operation),
        )
        .route("/sse", get(http::sse::sse_connect))
        .route("/messages", post(http::sse::post_message))
        .route("/messages/", post(http::sse::post_message))
        .route(
            http::stream::STREAM_PATH,
            get(http::stream::stream_connect)
                .post(http::stream::stream_message)
                .delete(http::stream::stream_terminate),
        )
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
