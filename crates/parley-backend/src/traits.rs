//! Collaborator traits consumed by the session core.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use parley_core::events::ReplyEvent;
use parley_core::ids::ThreadId;

use crate::error::BackendError;

/// Ordered stream of reply events for one turn.
pub type ReplyStream = Pin<Box<dyn Stream<Item = ReplyEvent> + Send>>;

/// The conversation backend: owns threads and produces streamed replies.
///
/// Treated as a stateless remote service — no in-process shared state, so
/// callers need no coordination beyond these contracts.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Create a new conversation thread.
    async fn create_thread(&self) -> Result<ThreadId, BackendError>;

    /// Append a user message to a thread.
    ///
    /// Must complete before a reply stream is requested for the turn.
    async fn append_message(&self, thread: &ThreadId, text: &str) -> Result<(), BackendError>;

    /// Request the reply stream for the thread's latest message.
    ///
    /// The stream yields events in generation order and ends with a
    /// terminal [`ReplyEvent::Completed`] or [`ReplyEvent::Failed`].
    async fn stream_reply(&self, thread: &ThreadId) -> Result<ReplyStream, BackendError>;

    /// Delete a thread. [`BackendError::ThreadNotFound`] means the thread
    /// is already gone and is treated as success by cleanup.
    async fn delete_thread(&self, thread: &ThreadId) -> Result<(), BackendError>;
}

/// Best-effort quick-reply generation after a completed turn.
#[async_trait]
pub trait SuggestionGenerator: Send + Sync {
    /// Generate follow-up suggestions for `(prompt, full_reply)`.
    ///
    /// Failure is non-fatal; callers log and swallow it.
    async fn generate(&self, prompt: &str, reply: &str) -> Result<Vec<String>, BackendError>;
}
