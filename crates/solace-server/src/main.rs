//! Solace server binary — the live voice-companion backend.
//!
//! Starts an axum HTTP/WebSocket server with structured logging and
//! graceful shutdown on SIGTERM/SIGINT; every active conversation is
//! ended before the process exits.

use solace_engine::ElevenLabsEngine;
use solace_relay::SessionRegistry;
use solace_server::{app, config, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("SOLACE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    if !config.engine.is_configured() {
        tracing::warn!(
            "engine API key or agent id not configured — conversations cannot be started"
        );
    }

    // Wire the engine and session registry
    let engine = Arc::new(ElevenLabsEngine::new(config.engine.clone()));
    let registry = Arc::new(SessionRegistry::new(engine, config.engine.clone()));

    let state = AppState {
        registry: registry.clone(),
    };
    let app = app(state, &config.server.allowed_origins);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting solace live backend");
    tracing::info!("websocket endpoint: ws://{}/ws/conversation", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // End all active conversations before exiting.
    registry.shutdown_all().await;
    tracing::info!("solace live backend shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
