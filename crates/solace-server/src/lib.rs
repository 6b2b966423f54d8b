//! Solace live backend — HTTP and WebSocket surface.

pub mod api_relay;
pub mod config;

use axum::http::HeaderValue;
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use solace_relay::SessionRegistry;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Table of live conversation sessions.
    pub registry: Arc<SessionRegistry>,
}

/// Service information handler.
///
/// Returns the service banner the frontend polls on load: version, engine
/// configuration status and the endpoints it should talk to.
async fn service_info(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": "Solace Live Backend",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "timestamp": Utc::now().to_rfc3339(),
        "configuration": {
            "engine_configured": state.registry.is_engine_configured(),
            "active_conversations": state.registry.count().await,
        },
        "endpoints": {
            "websocket": "/ws/conversation",
            "conversations": "/conversations",
            "health": "/health",
        },
    }))
}

/// Health check handler.
///
/// Returns `200 OK` with server status. Used by load balancers,
/// monitoring, and CI to verify the server is running.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Lists all active conversations.
async fn list_conversations(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let conversations = state.registry.list().await;
    Json(json!({
        "count": conversations.len(),
        "conversations": conversations,
    }))
}

/// Builds the CORS layer from the configured origin list. A `*` entry
/// (the default) allows any origin.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|origin| origin == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(origin = %origin, "ignoring unparsable CORS origin: {}", e);
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Builds the application router with all routes.
pub fn app(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = cors_layer(allowed_origins);
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/conversations", get(list_conversations))
        .route("/ws/conversation", get(api_relay::relay_handler))
        .layer(Extension(Arc::new(state)))
        .layer(cors)
}
