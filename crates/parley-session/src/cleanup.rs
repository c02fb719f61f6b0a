//! Session teardown: the mark-then-delete state machine.
//!
//! `Active` → (idle timer fired / disconnect schedule fired / sweep-selected)
//! → `PendingDeletion` → removed.
//!
//! All teardown triggers funnel into one cleanup channel consumed by a
//! single worker task, and every invocation takes a per-session in-flight
//! claim, so the remote delete runs at most once concurrently per session.
//! A remote delete that fails for any reason other than not-found leaves the
//! record in `PendingDeletion`; the sweep re-enqueues it every interval until
//! the delete succeeds or the resource is confirmed gone. No client ever
//! sees a teardown failure.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use parley_backend::ConversationBackend;
use parley_core::events::clear_chat_event;
use parley_core::ids::SessionId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::emitter::EventEmitter;
use crate::registry::SessionRegistry;

/// Executes session teardown.
pub struct CleanupManager {
    registry: Arc<SessionRegistry>,
    backend: Arc<dyn ConversationBackend>,
    emitter: Arc<EventEmitter>,
    in_flight: Mutex<HashSet<SessionId>>,
}

impl CleanupManager {
    /// Create a cleanup manager.
    pub fn new(
        registry: Arc<SessionRegistry>,
        backend: Arc<dyn ConversationBackend>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self {
            registry,
            backend,
            emitter,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Spawn the worker that drains the cleanup channel.
    ///
    /// Stops when `shutdown` is cancelled or every sender is dropped.
    pub fn spawn_worker(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<SessionId>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(id) => manager.cleanup(&id).await,
                        None => break,
                    },
                }
            }
        })
    }

    /// Run one cleanup invocation for `session_id`.
    ///
    /// Safe against every form of duplication: a concurrent invocation backs
    /// off on the in-flight claim, a lost race shows up as an absent record,
    /// and a record already in `PendingDeletion` is a retry of a previously
    /// failed teardown.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn cleanup(&self, session_id: &SessionId) {
        if !self.claim(session_id) {
            debug!("cleanup already in flight");
            return;
        }
        self.run_teardown(session_id).await;
        self.release(session_id);
    }

    async fn run_teardown(&self, session_id: &SessionId) {
        let fresh = self.registry.mark_for_deletion(session_id);
        let Some(snapshot) = self.registry.get(session_id) else {
            // Already cleaned by an earlier invocation (e.g. a timer that
            // fired for a session the sweep had just torn down).
            return;
        };
        debug!(fresh, "tearing down session");

        match snapshot.thread_id {
            Some(thread) => match self.backend.delete_thread(&thread).await {
                Ok(()) => self.finish_removal(session_id),
                Err(e) if e.is_not_found() => {
                    debug!(thread_id = %thread, "thread already gone remotely");
                    self.finish_removal(session_id);
                }
                Err(e) => {
                    counter!("cleanup_retries_total").increment(1);
                    warn!(
                        thread_id = %thread,
                        error = %e,
                        "remote teardown failed, will retry on next sweep"
                    );
                }
            },
            None => self.finish_removal(session_id),
        }
    }

    /// Remove the record and tell listeners the session's state is gone.
    fn finish_removal(&self, session_id: &SessionId) {
        self.registry.remove(session_id);
        counter!("sessions_cleaned_total").increment(1);
        let _ = self.emitter.emit(clear_chat_event(session_id.clone()));
    }

    fn claim(&self, session_id: &SessionId) -> bool {
        self.in_flight.lock().insert(session_id.clone())
    }

    fn release(&self, session_id: &SessionId) {
        let _ = self.in_flight.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{DeleteOutcome, FakeBackend, drain_events, registry_for_tests};
    use parley_core::events::ServerEvent;
    use parley_core::ids::ThreadId;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        backend: Arc<FakeBackend>,
        emitter: Arc<EventEmitter>,
        manager: Arc<CleanupManager>,
    }

    fn fixture() -> Fixture {
        let registry = registry_for_tests();
        let backend = Arc::new(FakeBackend::new());
        let emitter = Arc::new(EventEmitter::new());
        let manager = Arc::new(CleanupManager::new(
            Arc::clone(&registry),
            Arc::clone(&backend) as Arc<dyn ConversationBackend>,
            Arc::clone(&emitter),
        ));
        Fixture {
            registry,
            backend,
            emitter,
            manager,
        }
    }

    fn clear_chat_count(events: &[ServerEvent]) -> usize {
        events
            .iter()
            .filter(|e| e.event_type() == "clear_chat")
            .count()
    }

    #[tokio::test]
    async fn teardown_deletes_thread_and_broadcasts() {
        let f = fixture();
        let rx = f.emitter.subscribe();
        let id = f.registry.create();
        assert!(f.registry.bind_thread(&id, ThreadId::from("thread_9")));

        f.manager.cleanup(&id).await;

        assert!(f.registry.get(&id).is_none());
        assert_eq!(f.backend.deleted(), vec![ThreadId::from("thread_9")]);
        let events = drain_events(rx);
        assert_eq!(clear_chat_count(&events), 1);
        assert_eq!(events[0].session_id(), &id);
    }

    #[tokio::test]
    async fn teardown_without_thread_skips_remote_delete() {
        let f = fixture();
        let rx = f.emitter.subscribe();
        let id = f.registry.create();

        f.manager.cleanup(&id).await;

        assert!(f.registry.get(&id).is_none());
        assert!(f.backend.deleted().is_empty());
        assert_eq!(clear_chat_count(&drain_events(rx)), 1);
    }

    #[tokio::test]
    async fn not_found_is_treated_as_success() {
        let f = fixture();
        let rx = f.emitter.subscribe();
        let id = f.registry.create();
        assert!(f.registry.bind_thread(&id, ThreadId::from("thread_1")));
        f.backend.script_delete(DeleteOutcome::NotFound);

        f.manager.cleanup(&id).await;

        assert!(f.registry.get(&id).is_none());
        assert_eq!(clear_chat_count(&drain_events(rx)), 1);
    }

    #[tokio::test]
    async fn other_failure_leaves_record_for_retry() {
        let f = fixture();
        let rx = f.emitter.subscribe();
        let id = f.registry.create();
        assert!(f.registry.bind_thread(&id, ThreadId::from("thread_1")));
        f.backend.script_delete(DeleteOutcome::Fail);

        f.manager.cleanup(&id).await;

        // Record stays, staged for the next sweep; no broadcast yet.
        let snap = f.registry.get(&id).unwrap();
        assert_eq!(snap.status, crate::registry::SessionStatus::PendingDeletion);
        assert_eq!(clear_chat_count(&drain_events(rx)), 0);

        // The sweep retry succeeds and finishes the removal.
        let rx = f.emitter.subscribe();
        f.manager.cleanup(&id).await;
        assert!(f.registry.get(&id).is_none());
        assert_eq!(f.backend.deleted().len(), 2);
        assert_eq!(clear_chat_count(&drain_events(rx)), 1);
    }

    #[tokio::test]
    async fn failed_teardown_is_listed_by_the_sweep() {
        let f = fixture();
        let id = f.registry.create();
        assert!(f.registry.bind_thread(&id, ThreadId::from("thread_1")));
        f.backend.script_delete(DeleteOutcome::Fail);

        f.manager.cleanup(&id).await;
        assert_eq!(f.registry.list_expired(chrono::Utc::now()), vec![id]);
    }

    #[tokio::test]
    async fn absent_session_is_a_noop() {
        let f = fixture();
        let rx = f.emitter.subscribe();

        f.manager.cleanup(&"sess_ghost".into()).await;

        assert!(f.backend.deleted().is_empty());
        assert_eq!(clear_chat_count(&drain_events(rx)), 0);
    }

    #[tokio::test]
    async fn repeated_triggers_delete_exactly_once() {
        let f = fixture();
        let rx = f.emitter.subscribe();
        let id = f.registry.create();
        assert!(f.registry.bind_thread(&id, ThreadId::from("thread_1")));

        // Timer and sweep racing to clean the same session.
        tokio::join!(f.manager.cleanup(&id), f.manager.cleanup(&id));

        assert_eq!(f.backend.deleted().len(), 1);
        assert_eq!(clear_chat_count(&drain_events(rx)), 1);
    }

    #[tokio::test]
    async fn worker_drains_queue() {
        let f = fixture();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = f.manager.spawn_worker(rx, CancellationToken::new());

        let a = f.registry.create();
        let b = f.registry.create();
        tx.send(a.clone()).unwrap();
        tx.send(b).unwrap();
        // Duplicate trigger for a session the worker will already have
        // cleaned by the time it is dequeued.
        tx.send(a).unwrap();
        drop(tx);
        worker.await.unwrap();

        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn worker_stops_on_shutdown() {
        let f = fixture();
        let (_tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = f.manager.spawn_worker(rx, shutdown.clone());

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn timer_firing_for_removed_session_is_safe() {
        let f = fixture();
        let id = f.registry.create();
        f.manager.cleanup(&id).await;
        // A stale timer firing after removal re-enters cleanup harmlessly.
        f.manager.cleanup(&id).await;
        assert!(f.backend.deleted().is_empty());
    }
}
