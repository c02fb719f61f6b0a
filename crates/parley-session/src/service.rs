//! ChatService — the one object the transport layer talks to.
//!
//! Owns the registry, scheduler, cleanup manager, backend clients, and the
//! event emitter; wires the cleanup channel and backstop sweep at
//! construction. Each client connection calls the high-level operations
//! here; each open reply stream runs on its own task (spawned by the
//! transport), so a long turn never blocks other sessions.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parley_backend::{ConversationBackend, SuggestionGenerator};
use parley_core::events::ServerEvent;
use parley_core::ids::SessionId;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::cleanup::CleanupManager;
use crate::conversation::ConversationSession;
use crate::emitter::EventEmitter;
use crate::errors::SessionError;
use crate::expiry::ExpirationScheduler;
use crate::registry::SessionRegistry;
use crate::stream::StreamCoordinator;

/// Informational flag attached to a `session_created` event that replaced a
/// rejected resume.
pub const STALE_RESUME_INFO: &str = "unknown or expired session; a new session was created";

/// Timing configuration for the session core.
#[derive(Clone, Copy, Debug)]
pub struct ChatServiceConfig {
    /// Inactivity window before a session is torn down.
    pub idle_timeout: Duration,
    /// Interval of the backstop expiration sweep.
    pub sweep_interval: Duration,
}

impl Default for ChatServiceConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Result of a resume attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The session existed and was refreshed.
    Resumed(SessionId),
    /// Unknown or expired id; a fresh session was substituted. A deleted
    /// session is never resurrected.
    Replaced {
        /// The substituted session.
        session_id: SessionId,
    },
}

/// Multi-session coordinator.
pub struct ChatService {
    registry: Arc<SessionRegistry>,
    cleanup: Arc<CleanupManager>,
    backend: Arc<dyn ConversationBackend>,
    suggestions: Arc<dyn SuggestionGenerator>,
    emitter: Arc<EventEmitter>,
    cleanup_tx: mpsc::UnboundedSender<SessionId>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatService {
    /// Build the service and start its background tasks (cleanup worker and
    /// backstop sweep). Must be called within a tokio runtime.
    pub fn new(
        backend: Arc<dyn ConversationBackend>,
        suggestions: Arc<dyn SuggestionGenerator>,
        config: ChatServiceConfig,
    ) -> Arc<Self> {
        let (cleanup_tx, cleanup_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(ExpirationScheduler::new(
            cleanup_tx.clone(),
            config.idle_timeout,
        ));
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&scheduler)));
        let emitter = Arc::new(EventEmitter::new());
        let cleanup = Arc::new(CleanupManager::new(
            Arc::clone(&registry),
            Arc::clone(&backend),
            Arc::clone(&emitter),
        ));
        let shutdown = CancellationToken::new();

        let worker = cleanup.spawn_worker(cleanup_rx, shutdown.clone());
        let sweep = scheduler.spawn_sweep(
            Arc::clone(&registry),
            config.sweep_interval,
            shutdown.clone(),
        );
        info!(
            idle_timeout_secs = config.idle_timeout.as_secs(),
            sweep_interval_secs = config.sweep_interval.as_secs(),
            "chat service started"
        );

        Arc::new(Self {
            registry,
            cleanup,
            backend,
            suggestions,
            emitter,
            cleanup_tx,
            shutdown,
            tasks: Mutex::new(vec![worker, sweep]),
        })
    }

    /// Subscribe to the transport event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.emitter.subscribe()
    }

    /// The session registry (read access for transport and tests).
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Establish a new session.
    pub fn create_session(&self) -> SessionId {
        self.registry.create()
    }

    /// Attempt to continue a prior session.
    ///
    /// A live `Active` session is refreshed and resumed; anything else gets
    /// a fresh session plus an informational flag.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn resume_session(&self, session_id: &SessionId) -> ResumeOutcome {
        if self.registry.refresh(session_id).is_some() {
            ResumeOutcome::Resumed(session_id.clone())
        } else {
            ResumeOutcome::Replaced {
                session_id: self.registry.create(),
            }
        }
    }

    /// Handle one prompt turn to its terminal event.
    ///
    /// Serialized per session by the turn gate (an in-order queue), so a
    /// second prompt arriving before the first thread binding completes
    /// waits instead of racing. Errors returned here are user-visible; the
    /// session stays `Active` and reusable after any of them.
    #[instrument(skip(self, prompt), fields(session_id = %session_id))]
    pub async fn handle_prompt(
        &self,
        session_id: &SessionId,
        prompt: &str,
    ) -> Result<(), SessionError> {
        let gate = self
            .registry
            .turn_gate(session_id)
            .ok_or_else(|| SessionError::InvalidSession(session_id.clone()))?;
        let _turn = gate.lock().await;

        if !self.registry.is_active(session_id) {
            return Err(SessionError::InvalidSession(session_id.clone()));
        }

        let conversation =
            ConversationSession::new(&self.registry, self.backend.as_ref(), session_id.clone());
        let stream = conversation.begin_turn(prompt).await?;

        StreamCoordinator::new(
            &self.registry,
            self.suggestions.as_ref(),
            &self.emitter,
            session_id.clone(),
        )
        .run(prompt, stream)
        .await;
        Ok(())
    }

    /// Schedule (not immediate) cleanup after a client disconnect.
    ///
    /// Re-arms the idle timer: the session survives one full idle timeout
    /// past the disconnect and a resume inside that window cancels the
    /// teardown through the normal refresh path. In-flight streams are not
    /// cancelled.
    pub fn handle_disconnect(&self, session_id: &SessionId) {
        let _ = self.registry.refresh(session_id);
    }

    /// Enqueue an immediate cleanup for `session_id`.
    pub fn trigger_cleanup(&self, session_id: SessionId) {
        let _ = self.cleanup_tx.send(session_id);
    }

    /// Direct access to the cleanup manager (sweep-equivalent invocation).
    pub fn cleanup_manager(&self) -> &Arc<CleanupManager> {
        &self.cleanup
    }

    /// Stop background tasks. Sessions are in-memory only, so there is
    /// nothing to persist; remaining records die with the process.
    pub async fn shutdown(&self) {
        info!("chat service shutting down");
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}
