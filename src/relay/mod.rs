//! Network-facing relay.
//!
//! Thin collaborator around [`ProcessSession`]: accepts WebSocket
//! connections, deserialises client commands into calls on the session
//! surface, and serialises each session event back to the client. One
//! session per connection, tracked in an explicit registry so disconnects
//! and server shutdown can force-stop whatever is still running.

pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::config::GlobalConfig;
use crate::session::ProcessSession;

/// Registry of live sessions keyed by connection id.
pub type ActiveSessions = Arc<Mutex<HashMap<Uuid, Arc<ProcessSession>>>>;

/// Shared state passed to all relay handlers.
#[derive(Clone)]
pub struct RelayState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Connection id → session ownership map.
    pub sessions: ActiveSessions,
    /// Cancelled when the server shuts down; open connections observe it
    /// and drain so their sessions can be stopped before exit.
    pub shutdown: CancellationToken,
}

impl RelayState {
    /// Build fresh state with an empty session registry.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self {
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop every registered session and clear the registry.
    ///
    /// Used during server shutdown so no child process outlives the relay.
    pub async fn stop_all(&self) {
        let sessions: Vec<Arc<ProcessSession>> = {
            let mut guard = self.sessions.lock().await;
            guard.drain().map(|(_, session)| session).collect()
        };

        for session in sessions {
            session.stop().await;
        }
        info!("all sessions stopped");
    }
}

/// Handler for `GET /` — liveness summary for the frontend.
async fn root() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "message": "agent-relay is running" }))
}

/// Handler for `GET /health` — plain health probe.
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// Build the axum router with all routes and the CORS layer.
#[must_use]
pub fn build_router(state: RelayState) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ws", get(ws::ws_upgrade))
        .layer(cors)
        .with_state(state)
}

/// CORS layer for the configured origins; `"*"` allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let list: Vec<axum::http::HeaderValue> =
            origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(list)
    };

    CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .allow_origin(allow_origin)
}
