//! Ordered per-turn fan-out of reply events to the transport.
//!
//! The coordinator consumes one turn's reply stream: forwards each event in
//! arrival order, concatenates delta fragments into the full reply text used
//! for suggestion generation (independent of the forwarded snapshots), and
//! handles the terminal event. Only normal completion re-arms the session's
//! expiration — an aborted stream does not extend the timeout as if the user
//! were active.

use futures::StreamExt;
use metrics::counter;
use parley_backend::{ReplyStream, SuggestionGenerator};
use parley_core::events::{BaseEvent, ReplyEvent, ServerEvent};
use parley_core::ids::SessionId;
use tracing::{debug, instrument, warn};

use crate::emitter::EventEmitter;
use crate::registry::SessionRegistry;

/// Drives one prompt turn's reply stream to its terminal event.
pub struct StreamCoordinator<'a> {
    registry: &'a SessionRegistry,
    suggestions: &'a dyn SuggestionGenerator,
    emitter: &'a EventEmitter,
    session_id: SessionId,
}

impl<'a> StreamCoordinator<'a> {
    /// Create a coordinator for one turn of `session_id`.
    pub fn new(
        registry: &'a SessionRegistry,
        suggestions: &'a dyn SuggestionGenerator,
        emitter: &'a EventEmitter,
        session_id: SessionId,
    ) -> Self {
        Self {
            registry,
            suggestions,
            emitter,
            session_id,
        }
    }

    /// Consume the stream to its terminal event.
    ///
    /// Events are forwarded in the exact order received; nothing within the
    /// turn is dropped or reordered. Emission when every client is gone is a
    /// silent no-op, so a disconnect mid-stream never poisons the turn's
    /// terminal handling.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    pub async fn run(&self, prompt: &str, mut stream: ReplyStream) {
        let mut full_reply = String::new();

        while let Some(event) = stream.next().await {
            match event {
                ReplyEvent::Created => {
                    let _ = self.emitter.emit(ServerEvent::TextCreated {
                        base: BaseEvent::now(self.session_id.clone()),
                    });
                }
                ReplyEvent::Delta { fragment, snapshot } => {
                    full_reply.push_str(&fragment);
                    let _ = self.emitter.emit(ServerEvent::TextDelta {
                        base: BaseEvent::now(self.session_id.clone()),
                        fragment,
                        snapshot,
                    });
                }
                ReplyEvent::Completed => {
                    self.complete_turn(prompt, &full_reply).await;
                    return;
                }
                ReplyEvent::Failed { error } => {
                    counter!("turns_failed_total").increment(1);
                    debug!(error = %error, "reply stream failed mid-turn");
                    let _ = self.emitter.emit(ServerEvent::Error {
                        base: BaseEvent::now(self.session_id.clone()),
                        message: "reply generation failed".to_string(),
                        details: Some(error),
                    });
                    // No suggestions and no refresh: the session stays Active
                    // on whatever timer it already had.
                    return;
                }
            }
        }

        // The backend closed the stream without a terminal event. Treat it
        // like a mid-stream failure so the client is not left hanging.
        counter!("turns_failed_total").increment(1);
        warn!("reply stream ended without a terminal event");
        let _ = self.emitter.emit(ServerEvent::Error {
            base: BaseEvent::now(self.session_id.clone()),
            message: "reply stream ended unexpectedly".to_string(),
            details: None,
        });
    }

    /// Terminal handling for normal completion: completion signal, then
    /// best-effort suggestions, then expiration re-arm.
    async fn complete_turn(&self, prompt: &str, full_reply: &str) {
        counter!("turns_completed_total").increment(1);
        let _ = self.emitter.emit(ServerEvent::ResponseComplete {
            base: BaseEvent::now(self.session_id.clone()),
        });

        match self.suggestions.generate(prompt, full_reply).await {
            Ok(suggestions) if !suggestions.is_empty() => {
                let _ = self.emitter.emit(ServerEvent::Suggestions {
                    base: BaseEvent::now(self.session_id.clone()),
                    suggestions,
                });
            }
            Ok(_) => debug!("suggestion generator returned nothing"),
            Err(e) => {
                // Non-fatal: logged and swallowed, never surfaced to the
                // client and never allowed to fail the turn.
                counter!("suggestion_failures_total").increment(1);
                warn!(error = %e, "suggestion generation failed");
            }
        }

        let _ = self.registry.refresh(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeSuggestions, drain_events, registry_for_tests, scripted_stream};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn forwards_events_in_order_and_emits_suggestions() {
        let registry = registry_for_tests();
        let suggestions = FakeSuggestions::returning(vec!["a", "b", "c"]);
        let emitter = EventEmitter::new();
        let rx = emitter.subscribe();
        let id = registry.create();

        let stream = scripted_stream(vec![
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
        ]);

        StreamCoordinator::new(&registry, &suggestions, &emitter, id)
            .run("hi", stream)
            .await;

        let events = drain_events(rx);
        let types: Vec<&str> = events.iter().map(ServerEvent::event_type).collect();
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
        assert_matches!(
            &events[4],
            ServerEvent::Suggestions { suggestions, .. } if suggestions.len() == 3
        );
    }

    #[tokio::test]
    async fn suggestions_receive_concatenated_fragments() {
        let registry = registry_for_tests();
        let suggestions = FakeSuggestions::returning(vec!["x"]);
        let emitter = EventEmitter::new();
        let id = registry.create();

        // Snapshots diverge from fragments on purpose: the full reply must
        // come from fragment concatenation, not from the last snapshot.
        let stream = scripted_stream(vec![
            ReplyEvent::Created,
            ReplyEvent::Delta {
                fragment: "one ".into(),
                snapshot: "IGNORED".into(),
            },
            ReplyEvent::Delta {
                fragment: "two".into(),
                snapshot: "IGNORED".into(),
            },
            ReplyEvent::Completed,
        ]);

        StreamCoordinator::new(&registry, &suggestions, &emitter, id)
            .run("the prompt", stream)
            .await;

        let calls = suggestions.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("the prompt".to_string(), "one two".to_string()));
    }

    #[tokio::test]
    async fn completion_rearms_expiration() {
        let registry = registry_for_tests();
        let suggestions = FakeSuggestions::returning(Vec::<String>::new());
        let emitter = EventEmitter::new();
        let id = registry.create();
        assert!(!registry.has_timer(&id));

        let stream = scripted_stream(vec![ReplyEvent::Created, ReplyEvent::Completed]);
        StreamCoordinator::new(&registry, &suggestions, &emitter, id.clone())
            .run("hi", stream)
            .await;

        assert!(registry.has_timer(&id));
        assert!(registry.is_active(&id));
    }

    #[tokio::test]
    async fn suggestion_failure_is_swallowed_and_still_rearms() {
        let registry = registry_for_tests();
        let suggestions = FakeSuggestions::failing();
        let emitter = EventEmitter::new();
        let rx = emitter.subscribe();
        let id = registry.create();

        let stream = scripted_stream(vec![ReplyEvent::Created, ReplyEvent::Completed]);
        StreamCoordinator::new(&registry, &suggestions, &emitter, id.clone())
            .run("hi", stream)
            .await;

        let events = drain_events(rx);
        let types: Vec<&str> = events.iter().map(ServerEvent::event_type).collect();
        // Suggestions omitted, and no error event surfaced for the failure.
        assert_eq!(types, vec!["text_created", "response_complete"]);
        assert!(registry.has_timer(&id));
    }

    #[tokio::test]
    async fn empty_suggestions_are_omitted() {
        let registry = registry_for_tests();
        let suggestions = FakeSuggestions::returning(Vec::<String>::new());
        let emitter = EventEmitter::new();
        let rx = emitter.subscribe();
        let id = registry.create();

        let stream = scripted_stream(vec![ReplyEvent::Created, ReplyEvent::Completed]);
        StreamCoordinator::new(&registry, &suggestions, &emitter, id)
            .run("hi", stream)
            .await;

        let events = drain_events(rx);
        assert!(events.iter().all(|e| e.event_type() != "suggestions"));
    }

    #[tokio::test]
    async fn mid_stream_failure_emits_error_and_skips_suggestions() {
        let registry = registry_for_tests();
        let suggestions = FakeSuggestions::returning(vec!["never"]);
        let emitter = EventEmitter::new();
        let rx = emitter.subscribe();
        let id = registry.create();

        let stream = scripted_stream(vec![
            ReplyEvent::Created,
            ReplyEvent::Delta {
                fragment: "par".into(),
                snapshot: "par".into(),
            },
            ReplyEvent::Failed {
                error: "backend exploded".into(),
            },
        ]);

        StreamCoordinator::new(&registry, &suggestions, &emitter, id.clone())
            .run("hi", stream)
            .await;

        let events = drain_events(rx);
        let types: Vec<&str> = events.iter().map(ServerEvent::event_type).collect();
        assert_eq!(types, vec!["text_created", "text_delta", "error"]);
        assert_matches!(
            &events[2],
            ServerEvent::Error { details: Some(d), .. } if d == "backend exploded"
        );
        assert!(suggestions.calls().is_empty());
        // Failed generation is not session-ending, but does not re-arm.
        assert!(registry.is_active(&id));
        assert!(!registry.has_timer(&id));
    }

    #[tokio::test]
    async fn stream_without_terminal_event_surfaces_error() {
        let registry = registry_for_tests();
        let suggestions = FakeSuggestions::returning(Vec::<String>::new());
        let emitter = EventEmitter::new();
        let rx = emitter.subscribe();
        let id = registry.create();

        let stream = scripted_stream(vec![ReplyEvent::Created]);
        StreamCoordinator::new(&registry, &suggestions, &emitter, id)
            .run("hi", stream)
            .await;

        let events = drain_events(rx);
        assert_eq!(events.last().unwrap().event_type(), "error");
    }

    #[tokio::test]
    async fn emission_with_no_subscribers_is_harmless() {
        let registry = registry_for_tests();
        let suggestions = FakeSuggestions::returning(vec!["a"]);
        let emitter = EventEmitter::new();
        let id = registry.create();

        // No subscriber at all — the disconnected-transport case.
        let stream = scripted_stream(vec![ReplyEvent::Created, ReplyEvent::Completed]);
        StreamCoordinator::new(&registry, &suggestions, &emitter, id.clone())
            .run("hi", stream)
            .await;

        // Terminal handling still ran: the session was re-armed.
        assert!(registry.has_timer(&id));
    }
}
