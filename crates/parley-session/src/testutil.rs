//! Hand-rolled test doubles shared across the crate's test modules.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_backend::{BackendError, ConversationBackend, ReplyStream, SuggestionGenerator};
use parley_core::events::{ReplyEvent, ServerEvent};
use parley_core::ids::ThreadId;
use tokio::sync::{broadcast, mpsc};

use crate::expiry::ExpirationScheduler;
use crate::registry::SessionRegistry;

/// Registry wired to a scheduler whose cleanup channel goes nowhere.
pub(crate) fn registry_for_tests() -> Arc<SessionRegistry> {
    let (tx, _rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(ExpirationScheduler::new(tx, Duration::from_secs(1800)));
    Arc::new(SessionRegistry::new(scheduler))
}

/// A reply stream that plays back the given events.
pub(crate) fn scripted_stream(events: Vec<ReplyEvent>) -> ReplyStream {
    Box::pin(futures::stream::iter(events))
}

/// Collect every event currently buffered on a subscription.
pub(crate) fn drain_events(mut rx: broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Scripted outcome for one `delete_thread` call.
pub(crate) enum DeleteOutcome {
    /// Remote delete succeeds.
    Ok,
    /// Remote resource already gone.
    NotFound,
    /// Retryable failure.
    Fail,
}

/// Channel-driven fake of the conversation backend.
///
/// Thread ids are `thread_1`, `thread_2`, ... in creation order. Reply
/// streams are scripted per turn with [`push_reply`](Self::push_reply);
/// delete outcomes with [`script_delete`](Self::script_delete) (default Ok).
pub(crate) struct FakeBackend {
    create_count: AtomicUsize,
    fail_create: AtomicBool,
    fail_append: AtomicBool,
    appended: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<Vec<ReplyEvent>>>,
    stream_requests: AtomicUsize,
    deleted: Mutex<Vec<ThreadId>>,
    delete_script: Mutex<VecDeque<DeleteOutcome>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            create_count: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            fail_append: AtomicBool::new(false),
            appended: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            stream_requests: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            delete_script: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_append(&self) {
        self.fail_append.store(true, Ordering::SeqCst);
    }

    pub(crate) fn push_reply(&self, events: Vec<ReplyEvent>) {
        self.replies.lock().push_back(events);
    }

    pub(crate) fn script_delete(&self, outcome: DeleteOutcome) {
        self.delete_script.lock().push_back(outcome);
    }

    pub(crate) fn created_threads(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    pub(crate) fn appended(&self) -> Vec<String> {
        self.appended.lock().clone()
    }

    pub(crate) fn stream_requests(&self) -> usize {
        self.stream_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn deleted(&self) -> Vec<ThreadId> {
        self.deleted.lock().clone()
    }
}

fn server_error() -> BackendError {
    BackendError::Api {
        status: 500,
        message: "scripted failure".to_string(),
    }
}

#[async_trait]
impl ConversationBackend for FakeBackend {
    async fn create_thread(&self) -> Result<ThreadId, BackendError> {
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(server_error());
        }
        let n = self.create_count.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ThreadId::from(format!("thread_{n}")))
    }

    async fn append_message(&self, _thread: &ThreadId, text: &str) -> Result<(), BackendError> {
        if self.fail_append.swap(false, Ordering::SeqCst) {
            return Err(server_error());
        }
        self.appended.lock().push(text.to_string());
        Ok(())
    }

    async fn stream_reply(&self, _thread: &ThreadId) -> Result<ReplyStream, BackendError> {
        let _ = self.stream_requests.fetch_add(1, Ordering::SeqCst);
        let events = self.replies.lock().pop_front().unwrap_or_default();
        Ok(scripted_stream(events))
    }

    async fn delete_thread(&self, thread: &ThreadId) -> Result<(), BackendError> {
        self.deleted.lock().push(thread.clone());
        match self.delete_script.lock().pop_front() {
            None | Some(DeleteOutcome::Ok) => Ok(()),
            Some(DeleteOutcome::NotFound) => Err(BackendError::ThreadNotFound),
            Some(DeleteOutcome::Fail) => Err(server_error()),
        }
    }
}

/// Fake suggestion generator recording its inputs.
pub(crate) struct FakeSuggestions {
    result: Option<Vec<String>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeSuggestions {
    pub(crate) fn returning<S: Into<String>>(suggestions: Vec<S>) -> Self {
        Self {
            result: Some(suggestions.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            result: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SuggestionGenerator for FakeSuggestions {
    async fn generate(&self, prompt: &str, reply: &str) -> Result<Vec<String>, BackendError> {
        self.calls.lock().push((prompt.to_string(), reply.to_string()));
        self.result.clone().ok_or_else(server_error)
    }
}
