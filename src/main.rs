use mcp_session_gateway::{
    build_app, catalogue::register_builtin, config::Config, logging, registry::RegistryBuilder,
    session::SessionTable, AppState, GatewayOptions,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;

    let sessions = SessionTable::new();
    let _sweeper =
        sessions.spawn_idle_sweeper(config.session_sweep_interval, config.session_idle_timeout);
    let registry = register_builtin(RegistryBuilder::new(), &sessions)?.build();
    info!(operations = registry.len(), "operation registry loaded");

    let state = AppState::new(sessions, registry, GatewayOptions::from(&config));
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        session_fallback = config.session_fallback,
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
