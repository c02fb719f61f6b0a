//! # parley-server
//!
//! Axum HTTP + WebSocket transport for the Parley gateway.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `websocket::connection` | WebSocket upgrade, per-connection read/write loops |
//! | `websocket::handler` | Client event parsing and dispatch to the chat service |
//! | `websocket::broadcast` | Fan-out manager: session-filtered event delivery |
//! | `metrics` | Prometheus recorder and metric name constants |
//!
//! ## Data Flow
//!
//! `connection` → `handler` (dispatch) → `ChatService`.
//! The event pump subscribes to the service emitter and routes each event
//! through `broadcast` to the owning session's connections (`clear_chat`
//! goes to everyone).

#![deny(unsafe_code)]

pub mod metrics;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use parley_session::ChatService;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::websocket::broadcast::BroadcastManager;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// The session core.
    pub service: Arc<ChatService>,
    /// Connection fan-out.
    pub broadcast: Arc<BroadcastManager>,
}

impl AppState {
    /// Build state around a chat service.
    pub fn new(service: Arc<ChatService>) -> Self {
        Self {
            service,
            broadcast: Arc::new(BroadcastManager::new()),
        }
    }
}

/// Spawn the pump that moves service events onto client connections.
///
/// Runs until the service emitter is dropped. A lagged subscription is
/// logged and skipped — transport fan-out never blocks the session core.
pub fn spawn_event_pump(state: AppState) -> JoinHandle<()> {
    let mut rx = state.service.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => state.broadcast.dispatch(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event pump lagged behind the emitter");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Build the router: `/ws`, `/health`, `/metrics`.
pub fn router(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/ws", get(websocket::connection::ws_handler))
        .route("/health", get(|| async { "ok" }))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
