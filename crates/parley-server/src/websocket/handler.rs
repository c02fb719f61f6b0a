//! Client event dispatch.
//!
//! Session establishment responses (`session_created`, `session_resumed`)
//! and turn-rejection errors go straight down the requesting connection;
//! streamed turn events and teardown broadcasts arrive via the event pump.
//! Each prompt turn runs on its own task so one open stream never blocks
//! this connection's reader loop or other sessions.

use std::sync::Arc;

use parley_core::events::{BaseEvent, ClientEvent, ServerEvent, error_event};
use parley_session::service::STALE_RESUME_INFO;
use parley_session::{ResumeOutcome, SessionError};
use tracing::{debug, warn};

use crate::AppState;
use crate::websocket::connection::ClientConnection;

/// Handle one parsed client event.
pub async fn handle_client_event(
    event: ClientEvent,
    connection: &Arc<ClientConnection>,
    state: &AppState,
) {
    match event {
        ClientEvent::InitSession => {
            let session_id = state.service.create_session();
            connection.bind_session(session_id.clone());
            send_direct(
                connection,
                &ServerEvent::SessionCreated {
                    base: BaseEvent::now(session_id),
                    info: None,
                },
            );
        }
        ClientEvent::ResumeSession { session_id } => {
            match state.service.resume_session(&session_id) {
                ResumeOutcome::Resumed(session_id) => {
                    debug!(session_id = %session_id, "session resumed");
                    connection.bind_session(session_id.clone());
                    send_direct(
                        connection,
                        &ServerEvent::SessionResumed {
                            base: BaseEvent::now(session_id),
                        },
                    );
                }
                ResumeOutcome::Replaced { session_id } => {
                    debug!(session_id = %session_id, "stale resume replaced");
                    connection.bind_session(session_id.clone());
                    send_direct(
                        connection,
                        &ServerEvent::SessionCreated {
                            base: BaseEvent::now(session_id),
                            info: Some(STALE_RESUME_INFO.to_string()),
                        },
                    );
                }
            }
        }
        ClientEvent::SendPrompt { prompt } => {
            let Some(session_id) = connection.session_id() else {
                send_direct(
                    connection,
                    &error_event(
                        "".to_string(),
                        "no session established; send init_session first",
                    ),
                );
                return;
            };
            // One task per turn: the reader loop stays free for further
            // client events while the reply streams.
            let service = Arc::clone(&state.service);
            let connection = Arc::clone(connection);
            let _ = tokio::spawn(async move {
                if let Err(e) = service.handle_prompt(&session_id, &prompt).await {
                    send_turn_error(&connection, &session_id, &e);
                }
            });
        }
    }
}

/// Report an unparseable frame back to the sender.
pub fn send_parse_error(connection: &Arc<ClientConnection>, detail: &str) {
    let session_id = connection.session_id().unwrap_or_else(|| "".into());
    send_direct(
        connection,
        &ServerEvent::Error {
            base: BaseEvent::now(session_id),
            message: "unrecognized client event".to_string(),
            details: Some(detail.to_string()),
        },
    );
}

/// Map a rejected turn to a user-visible error on the requesting connection.
fn send_turn_error(
    connection: &Arc<ClientConnection>,
    session_id: &parley_core::ids::SessionId,
    error: &SessionError,
) {
    let message = match error {
        SessionError::InvalidSession(_) => "unknown or expired session".to_string(),
        SessionError::Backend(_) => "conversation backend unavailable".to_string(),
    };
    send_direct(
        connection,
        &ServerEvent::Error {
            base: BaseEvent::now(session_id.clone()),
            message,
            details: Some(error.to_string()),
        },
    );
}

/// Serialize and queue an event for one connection.
fn send_direct(connection: &Arc<ClientConnection>, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            if !connection.send(Arc::new(json)) {
                warn!(conn_id = %connection.id, "direct send dropped (channel full)");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize direct event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_backend::{BackendError, ConversationBackend, ReplyStream, SuggestionGenerator};
    use parley_core::events::ReplyEvent;
    use parley_core::ids::ThreadId;
    use parley_session::{ChatService, ChatServiceConfig};
    use tokio::sync::mpsc;

    use crate::websocket::connection::Outbound;

    /// Minimal scripted backend: every turn replies "Hello" in two deltas.
    struct ScriptedBackend;

    #[async_trait]
    impl ConversationBackend for ScriptedBackend {
        async fn create_thread(&self) -> Result<ThreadId, BackendError> {
            Ok(ThreadId::from("thread_1"))
        }

        async fn append_message(&self, _: &ThreadId, _: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn stream_reply(&self, _: &ThreadId) -> Result<ReplyStream, BackendError> {
            Ok(Box::pin(futures::stream::iter(vec![
                ReplyEvent::Created,
                ReplyEvent::Delta {
                    fragment: "Hel".into(),
                    snapshot: "Hel".into(),
                },
                ReplyEvent::Delta {
                    fragment: "lo".into(),
                    snapshot: "Hello".into(),
                },
                ReplyEvent::Completed,
            ])))
        }

        async fn delete_thread(&self, _: &ThreadId) -> Result<(), BackendError> {
            Ok(())
        }
    }

    struct ThreeSuggestions;

    #[async_trait]
    impl SuggestionGenerator for ThreeSuggestions {
        async fn generate(&self, _: &str, _: &str) -> Result<Vec<String>, BackendError> {
            Ok(vec!["a".into(), "b".into(), "c".into()])
        }
    }

    fn app_state() -> AppState {
        let service = ChatService::new(
            Arc::new(ScriptedBackend),
            Arc::new(ThreeSuggestions),
            ChatServiceConfig::default(),
        );
        AppState::new(service)
    }

    fn connection() -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(64);
        (Arc::new(ClientConnection::new("c1".into(), tx)), rx)
    }

    fn recv_json(rx: &mut mpsc::Receiver<Outbound>) -> serde_json::Value {
        match rx.try_recv().expect("expected a frame") {
            Outbound::Text(json) => serde_json::from_str(&json).unwrap(),
            Outbound::Pong(_) => panic!("unexpected pong"),
        }
    }

    #[tokio::test]
    async fn init_session_binds_and_responds() {
        let state = app_state();
        let (conn, mut rx) = connection();

        handle_client_event(ClientEvent::InitSession, &conn, &state).await;

        let response = recv_json(&mut rx);
        assert_eq!(response["type"], "session_created");
        assert!(response.get("info").is_none());
        let bound = conn.session_id().unwrap();
        assert_eq!(response["sessionId"], bound.as_str());
        assert!(state.service.registry().is_active(&bound));
    }

    #[tokio::test]
    async fn resume_live_session_responds_resumed() {
        let state = app_state();
        let (conn, mut rx) = connection();
        let session_id = state.service.create_session();

        handle_client_event(
            ClientEvent::ResumeSession {
                session_id: session_id.clone(),
            },
            &conn,
            &state,
        )
        .await;

        let response = recv_json(&mut rx);
        assert_eq!(response["type"], "session_resumed");
        assert_eq!(response["sessionId"], session_id.as_str());
        assert_eq!(conn.session_id().unwrap(), session_id);
    }

    #[tokio::test]
    async fn resume_stale_session_responds_created_with_info() {
        let state = app_state();
        let (conn, mut rx) = connection();

        handle_client_event(
            ClientEvent::ResumeSession {
                session_id: "sess_stale".into(),
            },
            &conn,
            &state,
        )
        .await;

        let response = recv_json(&mut rx);
        assert_eq!(response["type"], "session_created");
        assert_eq!(response["info"], STALE_RESUME_INFO);
        assert_ne!(response["sessionId"], "sess_stale");
        // Never session_resumed for a stale id.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn prompt_without_session_is_an_error() {
        let state = app_state();
        let (conn, mut rx) = connection();

        handle_client_event(
            ClientEvent::SendPrompt {
                prompt: "hi".into(),
            },
            &conn,
            &state,
        )
        .await;

        let response = recv_json(&mut rx);
        assert_eq!(response["type"], "error");
    }

    #[tokio::test]
    async fn prompt_streams_through_broadcast() {
        let state = app_state();
        let _pump = crate::spawn_event_pump(state.clone());
        let (conn, mut rx) = connection();
        state.broadcast.add(Arc::clone(&conn)).await;

        handle_client_event(ClientEvent::InitSession, &conn, &state).await;
        let created = recv_json(&mut rx);
        assert_eq!(created["type"], "session_created");

        handle_client_event(
            ClientEvent::SendPrompt {
                prompt: "hello".into(),
            },
            &conn,
            &state,
        )
        .await;

        // The turn runs on its own task and fans out via the pump.
        let mut types = Vec::new();
        while types.len() < 5 {
            match tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv()).await {
                Ok(Some(Outbound::Text(json))) => {
                    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
                    types.push(value["type"].as_str().unwrap().to_string());
                }
                other => panic!("stream stalled: {other:?}"),
            }
        }
        assert_eq!(
            types,
            vec![
                "text_created",
                "text_delta",
                "text_delta",
                "response_complete",
                "suggestions"
            ]
        );
    }

    #[tokio::test]
    async fn parse_error_reported_to_sender() {
        let (conn, mut rx) = connection();
        send_parse_error(&conn, "bad frame");
        let response = recv_json(&mut rx);
        assert_eq!(response["type"], "error");
        assert_eq!(response["details"], "bad frame");
    }
}
