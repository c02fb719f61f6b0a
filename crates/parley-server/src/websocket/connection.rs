//! WebSocket upgrade and per-connection read/write loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use parley_core::events::ClientEvent;
use parley_core::ids::SessionId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::websocket::handler;

/// Outbound capacity per connection; beyond this a client is dropping events.
const OUTBOUND_BUFFER: usize = 256;

/// Frames queued toward one client.
#[derive(Debug)]
pub enum Outbound {
    /// Serialized [`parley_core::events::ServerEvent`].
    Text(Arc<String>),
    /// Pong response carrying the ping payload.
    Pong(Bytes),
}

/// One connected WebSocket client.
pub struct ClientConnection {
    /// Connection ID (not the session ID — one session may reconnect).
    pub id: String,
    tx: mpsc::Sender<Outbound>,
    session_id: Mutex<Option<SessionId>>,
    drops: AtomicU64,
}

impl ClientConnection {
    /// Create a connection wrapper around an outbound queue.
    pub fn new(id: String, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            session_id: Mutex::new(None),
            drops: AtomicU64::new(0),
        }
    }

    /// Bind this connection to a session (on init or resume).
    pub fn bind_session(&self, session_id: SessionId) {
        *self.session_id.lock() = Some(session_id);
    }

    /// The bound session, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id.lock().clone()
    }

    /// Queue a frame without blocking. Returns false if the client's buffer
    /// is full (the frame is dropped and counted).
    pub fn send(&self, json: Arc<String>) -> bool {
        if self.tx.try_send(Outbound::Text(json)).is_ok() {
            true
        } else {
            let _ = self.drops.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Queue a pong frame.
    pub fn send_pong(&self, payload: Bytes) {
        let _ = self.tx.try_send(Outbound::Pong(payload));
    }

    /// Lifetime count of dropped frames.
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one WebSocket connection to completion.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = format!("conn_{}", Uuid::now_v7());
    info!(conn_id = %conn_id, "websocket connected");
    counter!("ws_connections_total").increment(1);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), outbound_tx));
    state.broadcast.add(Arc::clone(&connection)).await;
    gauge!("ws_connections_active").set(state.broadcast.connection_count() as f64);

    // Writer task: drains the outbound queue in order. Per-turn ordering is
    // preserved end to end because every event for this client flows through
    // this single queue.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let result = match frame {
                Outbound::Text(json) => ws_tx.send(Message::Text(json.as_str().into())).await,
                Outbound::Pong(payload) => ws_tx.send(Message::Pong(payload)).await,
            };
            if result.is_err() {
                debug!("websocket send failed, client disconnected");
                break;
            }
        }
    });

    // Reader loop.
    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(payload)) => {
                connection.send_pong(payload);
                continue;
            }
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "client sent close frame");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "websocket error");
                break;
            }
        };

        match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => handler::handle_client_event(event, &connection, &state).await,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "unparseable client event");
                handler::send_parse_error(&connection, &e.to_string());
            }
        }
    }

    // Disconnect: schedule (not immediate) cleanup for the bound session and
    // stop delivering to this client. In-flight streams keep running.
    if let Some(session_id) = connection.session_id() {
        state.service.handle_disconnect(&session_id);
    }
    state.broadcast.remove(&conn_id).await;
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").set(state.broadcast.connection_count() as f64);
    writer.abort();
    info!(conn_id = %conn_id, "websocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_session_visible_to_reader() {
        let (tx, _rx) = mpsc::channel(8);
        let conn = ClientConnection::new("c1".into(), tx);
        assert!(conn.session_id().is_none());

        conn.bind_session("sess_1".into());
        assert_eq!(conn.session_id().unwrap().as_str(), "sess_1");
    }

    #[tokio::test]
    async fn send_counts_drops_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new("c1".into(), tx);

        assert!(conn.send(Arc::new("one".into())));
        assert!(!conn.send(Arc::new("two".into())));
        assert!(!conn.send(Arc::new("three".into())));
        assert_eq!(conn.drop_count(), 2);
    }

    #[tokio::test]
    async fn rebinding_replaces_session() {
        let (tx, _rx) = mpsc::channel(8);
        let conn = ClientConnection::new("c1".into(), tx);
        conn.bind_session("sess_old".into());
        conn.bind_session("sess_new".into());
        assert_eq!(conn.session_id().unwrap().as_str(), "sess_new");
    }
}
