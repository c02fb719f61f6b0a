//! Per-session binding to the conversation backend.
//!
//! A session owns at most one backend thread, created lazily on the first
//! prompt. Prompt handling is serialized per session by the registry's turn
//! gate, so concurrent first prompts cannot double-create threads. Backend
//! failures abort the turn with a user-visible error but leave the session
//! `Active` and reusable for the next prompt.

use parley_backend::{ConversationBackend, ReplyStream};
use parley_core::ids::{SessionId, ThreadId};
use tracing::{instrument, warn};

use crate::errors::SessionError;
use crate::registry::{SessionRegistry, SessionStatus};

/// One session's view of the conversation backend.
pub struct ConversationSession<'a> {
    registry: &'a SessionRegistry,
    backend: &'a dyn ConversationBackend,
    session_id: SessionId,
}

impl<'a> ConversationSession<'a> {
    /// Create the per-session view.
    pub fn new(
        registry: &'a SessionRegistry,
        backend: &'a dyn ConversationBackend,
        session_id: SessionId,
    ) -> Self {
        Self {
            registry,
            backend,
            session_id,
        }
    }

    /// Run the pre-stream phase of one turn: bind the thread (first prompt
    /// only), append the prompt, refresh the session, and open the reply
    /// stream.
    ///
    /// Append must succeed before a stream is requested; any failure here is
    /// reported to the caller and starts no stream.
    #[instrument(skip(self, prompt), fields(session_id = %self.session_id))]
    pub async fn begin_turn(&self, prompt: &str) -> Result<ReplyStream, SessionError> {
        let thread = self.ensure_thread().await?;
        self.backend.append_message(&thread, prompt).await?;

        // The accepted prompt refreshes last_active and re-arms expiration.
        // A failed refresh means the session was torn down while the append
        // was in flight — reject before streaming starts.
        if self.registry.refresh(&self.session_id).is_none() {
            return Err(SessionError::InvalidSession(self.session_id.clone()));
        }

        let stream = self.backend.stream_reply(&thread).await?;
        Ok(stream)
    }

    /// Return the session's thread, creating and binding one on first use.
    async fn ensure_thread(&self) -> Result<ThreadId, SessionError> {
        let snapshot = self
            .registry
            .get(&self.session_id)
            .ok_or_else(|| SessionError::InvalidSession(self.session_id.clone()))?;
        if snapshot.status != SessionStatus::Active {
            return Err(SessionError::InvalidSession(self.session_id.clone()));
        }
        if let Some(thread) = snapshot.thread_id {
            return Ok(thread);
        }

        let thread = self.backend.create_thread().await?;
        if self.registry.bind_thread(&self.session_id, thread.clone()) {
            Ok(thread)
        } else {
            // The session was torn down while the thread was being created.
            // Drop the orphan so the backend does not accumulate threads no
            // session references.
            if let Err(e) = self.backend.delete_thread(&thread).await {
                warn!(thread_id = %thread, error = %e, "failed to delete orphaned thread");
            }
            Err(SessionError::InvalidSession(self.session_id.clone()))
        }
    }
}
