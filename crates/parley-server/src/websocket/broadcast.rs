//! Event fan-out to connected WebSocket clients.
//!
//! Each [`ServerEvent`] is serialized once and shared (`Arc<String>`) across
//! recipients. Session-scoped events go to the connections bound to that
//! session; `clear_chat` goes to everyone. Delivering toward a session with
//! no connections is a silent no-op — a disconnected client simply misses
//! the events, it never fails the sender.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::counter;
use parley_core::events::ServerEvent;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;

/// Maximum total lifetime message drops before forcibly disconnecting a slow client.
const MAX_TOTAL_DROPS: u64 = 100;

/// Manages event delivery to connected clients.
pub struct BroadcastManager {
    /// Connected clients indexed by connection ID.
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
    /// Atomic counter tracking total connections (avoids read-locking for count queries).
    active_count: AtomicUsize,
}

impl BroadcastManager {
    /// Create a new broadcast manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        if conns.insert(connection.id.clone(), connection).is_none() {
            let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, connection_id: &str) {
        let mut conns = self.connections.write().await;
        if conns.remove(connection_id).is_some() {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Route one service event to its recipients.
    pub async fn dispatch(&self, event: &ServerEvent) {
        if event.is_broadcast() {
            self.deliver(|_| true, event, "all").await;
        } else {
            let session_id = event.session_id().clone();
            self.deliver(
                |c| c.session_id().as_ref() == Some(&session_id),
                event,
                session_id.as_str(),
            )
            .await;
        }
    }

    /// Serialize once, fan out to matching clients, remove slow clients.
    async fn deliver(
        &self,
        filter: impl Fn(&ClientConnection) -> bool,
        event: &ServerEvent,
        label: &str,
    ) {
        let json = match serde_json::to_string(event) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(event_type = event.event_type(), error = %e, "failed to serialize event");
                return;
            }
        };
        let mut to_remove = Vec::new();
        {
            let conns = self.connections.read().await;
            let mut recipients = 0u32;
            for conn in conns.values() {
                if filter(conn) {
                    recipients += 1;
                    if !conn.send(Arc::clone(&json)) {
                        counter!("ws_broadcast_drops_total").increment(1);
                        let drops = conn.drop_count();
                        if drops >= MAX_TOTAL_DROPS {
                            warn!(conn_id = %conn.id, label, drops, "disconnecting slow client");
                            to_remove.push(conn.id.clone());
                        } else {
                            warn!(conn_id = %conn.id, label, total_drops = drops, "failed to deliver event (channel full)");
                        }
                    }
                }
            }
            debug!(
                event_type = event.event_type(),
                label, recipients, "dispatched event"
            );
        }
        if !to_remove.is_empty() {
            let mut conns = self.connections.write().await;
            for id in &to_remove {
                if conns.remove(id).is_some() {
                    let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Number of active connections.
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use parley_core::events::{BaseEvent, clear_chat_event};
    use tokio::sync::mpsc;

    fn make_connection(
        id: &str,
        session: Option<&str>,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(id.into(), tx);
        if let Some(sid) = session {
            conn.bind_session(sid.into());
        }
        (Arc::new(conn), rx)
    }

    fn delta_event(session_id: &str) -> ServerEvent {
        ServerEvent::TextDelta {
            base: BaseEvent::now(session_id),
            fragment: "hi".into(),
            snapshot: "hi".into(),
        }
    }

    fn received_text(outbound: Outbound) -> Arc<String> {
        match outbound {
            Outbound::Text(json) => json,
            Outbound::Pong(_) => panic!("unexpected pong"),
        }
    }

    #[tokio::test]
    async fn add_and_remove_connection() {
        let bm = BroadcastManager::new();
        let (conn, _rx) = make_connection("c1", None);
        bm.add(conn).await;
        assert_eq!(bm.connection_count(), 1);
        bm.remove("c1").await;
        assert_eq!(bm.connection_count(), 0);
    }

    #[tokio::test]
    async fn remove_nonexistent_connection() {
        let bm = BroadcastManager::new();
        bm.remove("no_such").await;
        assert_eq!(bm.connection_count(), 0);
    }

    #[tokio::test]
    async fn session_event_reaches_only_bound_connections() {
        let bm = BroadcastManager::new();
        let (c1, mut rx1) = make_connection("c1", Some("sess_a"));
        let (c2, mut rx2) = make_connection("c2", Some("sess_b"));
        let (c3, mut rx3) = make_connection("c3", None);
        bm.add(c1).await;
        bm.add(c2).await;
        bm.add(c3).await;

        bm.dispatch(&delta_event("sess_a")).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn clear_chat_reaches_everyone() {
        let bm = BroadcastManager::new();
        let (c1, mut rx1) = make_connection("c1", Some("sess_a"));
        let (c2, mut rx2) = make_connection("c2", Some("sess_b"));
        let (c3, mut rx3) = make_connection("c3", None);
        bm.add(c1).await;
        bm.add(c2).await;
        bm.add(c3).await;

        bm.dispatch(&clear_chat_event("sess_a")).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_ok());
    }

    #[tokio::test]
    async fn dispatch_to_absent_session_is_silent() {
        let bm = BroadcastManager::new();
        // No connections at all — must not panic or error.
        bm.dispatch(&delta_event("sess_nobody")).await;
    }

    #[tokio::test]
    async fn dispatched_event_is_valid_json() {
        let bm = BroadcastManager::new();
        let (conn, mut rx) = make_connection("c1", Some("sess_a"));
        bm.add(conn).await;

        bm.dispatch(&delta_event("sess_a")).await;

        let json = received_text(rx.recv().await.unwrap());
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["type"], "text_delta");
        assert_eq!(parsed["sessionId"], "sess_a");
        assert_eq!(parsed["fragment"], "hi");
    }

    #[tokio::test]
    async fn serialization_shared_across_recipients() {
        let bm = BroadcastManager::new();
        let (c1, mut rx1) = make_connection("c1", Some("s"));
        let (c2, mut rx2) = make_connection("c2", Some("s"));
        bm.add(c1).await;
        bm.add(c2).await;

        bm.dispatch(&delta_event("s")).await;

        let m1 = received_text(rx1.recv().await.unwrap());
        let m2 = received_text(rx2.recv().await.unwrap());
        assert!(Arc::ptr_eq(&m1, &m2));
    }

    #[tokio::test]
    async fn slow_client_disconnected_after_threshold() {
        let bm = BroadcastManager::new();
        // Slow client: buffer of 1, never drained.
        let (tx, _rx) = mpsc::channel(1);
        let slow = Arc::new(ClientConnection::new("slow".into(), tx));
        slow.bind_session("s".into());
        let (fast, mut fast_rx) = make_connection("fast", Some("s"));
        bm.add(slow).await;
        bm.add(fast).await;

        let event = delta_event("s");
        // First dispatch fills the slow client's buffer, then exceed the
        // drop threshold.
        for _ in 0..=MAX_TOTAL_DROPS {
            bm.dispatch(&event).await;
            while fast_rx.try_recv().is_ok() {}
        }

        assert_eq!(bm.connection_count(), 1);
    }

    #[tokio::test]
    async fn fast_client_stays_connected() {
        let bm = BroadcastManager::new();
        let (fast, mut rx) = make_connection("fast", Some("s"));
        bm.add(fast).await;

        let event = delta_event("s");
        for _ in 0..20 {
            bm.dispatch(&event).await;
            while rx.try_recv().is_ok() {}
        }
        assert_eq!(bm.connection_count(), 1);
    }

    #[tokio::test]
    async fn add_connection_overwrites_same_id() {
        let bm = BroadcastManager::new();
        let (c1, _rx1) = make_connection("same", Some("sess_a"));
        let (c2, mut rx2) = make_connection("same", Some("sess_b"));
        bm.add(c1).await;
        bm.add(c2).await;
        assert_eq!(bm.connection_count(), 1);

        bm.dispatch(&delta_event("sess_b")).await;
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn slow_client_threshold_constant_value() {
        assert_eq!(MAX_TOTAL_DROPS, 100);
    }
}
