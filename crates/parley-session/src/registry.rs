//! In-memory session store with atomic lifecycle operations.
//!
//! The registry is the sole writer of session records; every other component
//! reads or requests mutations through the operations here. All mutating
//! operations are atomic with respect to each other — a single lock guards
//! the map, so two nearly-simultaneous calls against the same session never
//! interleave partially.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::gauge;
use parking_lot::Mutex;
use parley_core::ids::{SessionId, ThreadId};
use tracing::debug;

use crate::expiry::{ExpirationScheduler, ExpirationTimer};

/// Session lifecycle state.
///
/// Transitions only `Active -> PendingDeletion`; removal is the only way out
/// of `PendingDeletion`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// The only state from which operations are served.
    Active,
    /// Terminal staging state before removal.
    PendingDeletion,
}

/// One session record. Owned exclusively by the registry.
struct SessionRecord {
    thread_id: Option<ThreadId>,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
    status: SessionStatus,
    /// At most one live timer; replaced atomically under the registry lock.
    timer: Option<ExpirationTimer>,
    /// Serializes prompt handling for this session (in-order turn queue).
    turn_gate: Arc<tokio::sync::Mutex<()>>,
}

/// Read-only copy of a record's data fields.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    /// The session's id.
    pub id: SessionId,
    /// Bound conversation thread, if any.
    pub thread_id: Option<ThreadId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last accepted prompt or resume.
    pub last_active: DateTime<Utc>,
    /// Lifecycle state.
    pub status: SessionStatus,
}

/// The session store.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    scheduler: Arc<ExpirationScheduler>,
}

impl SessionRegistry {
    /// Create an empty registry using `scheduler` for timer re-arming.
    pub fn new(scheduler: Arc<ExpirationScheduler>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            scheduler,
        }
    }

    /// Allocate a new `Active` session: no thread, no timer,
    /// `last_active = now`. Always succeeds; ids are never reused.
    pub fn create(&self) -> SessionId {
        let id = SessionId::generate();
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let _ = sessions.insert(
            id.clone(),
            SessionRecord {
                thread_id: None,
                created_at: now,
                last_active: now,
                status: SessionStatus::Active,
                timer: None,
                turn_gate: Arc::new(tokio::sync::Mutex::new(())),
            },
        );
        gauge!("sessions_active").set(sessions.len() as f64);
        debug!(session_id = %id, "session created");
        id
    }

    /// Look up a session. No side effects.
    pub fn get(&self, id: &SessionId) -> Option<SessionSnapshot> {
        let sessions = self.sessions.lock();
        sessions.get(id).map(|record| snapshot(id, record))
    }

    /// True iff the session exists and is `Active`.
    pub fn is_active(&self, id: &SessionId) -> bool {
        let sessions = self.sessions.lock();
        sessions
            .get(id)
            .is_some_and(|r| r.status == SessionStatus::Active)
    }

    /// Keep a session alive and re-arm its own death.
    ///
    /// Fails (returns `None`) unless the session exists and is `Active`.
    /// On success: updates `last_active`, cancels any existing timer, and
    /// arms a replacement — all under one lock, so two live timers for the
    /// same session are impossible.
    pub fn refresh(&self, id: &SessionId) -> Option<SessionSnapshot> {
        let mut sessions = self.sessions.lock();
        let record = sessions.get_mut(id)?;
        if record.status != SessionStatus::Active {
            return None;
        }
        record.last_active = Utc::now();
        if let Some(old) = record.timer.take() {
            old.cancel();
        }
        record.timer = Some(self.scheduler.arm(id.clone()));
        Some(snapshot(id, record))
    }

    /// Bind the conversation thread, exactly once.
    ///
    /// Returns false if the session is missing, not `Active`, or already
    /// bound. Once set, the thread id is immutable for the session's life.
    pub fn bind_thread(&self, id: &SessionId, thread_id: ThreadId) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(record) = sessions.get_mut(id) else {
            return false;
        };
        if record.status != SessionStatus::Active || record.thread_id.is_some() {
            return false;
        }
        record.thread_id = Some(thread_id);
        true
    }

    /// Transition `Active -> PendingDeletion`.
    ///
    /// Returns true only on the actual transition — this is the guard that
    /// lets exactly one of several racing cleanup paths proceed to the
    /// remote delete. Returns false if the session is absent or already
    /// `PendingDeletion`. Entering `PendingDeletion` cancels the timer so it
    /// can never fire a duplicate cleanup.
    pub fn mark_for_deletion(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(record) = sessions.get_mut(id) else {
            return false;
        };
        if record.status != SessionStatus::Active {
            return false;
        }
        record.status = SessionStatus::PendingDeletion;
        if let Some(timer) = record.timer.take() {
            timer.cancel();
        }
        debug!(session_id = %id, "session marked for deletion");
        true
    }

    /// Cancel any timer and delete the record unconditionally.
    ///
    /// Idempotent: removing an absent id is a no-op.
    pub fn remove(&self, id: &SessionId) {
        let mut sessions = self.sessions.lock();
        if let Some(record) = sessions.remove(id) {
            if let Some(timer) = record.timer {
                timer.cancel();
            }
            gauge!("sessions_active").set(sessions.len() as f64);
            debug!(session_id = %id, "session removed");
        }
    }

    /// Sessions due for cleanup as of `now`: every `PendingDeletion` record
    /// plus every `Active` record idle longer than the configured timeout.
    pub fn list_expired(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let idle_timeout = chrono::Duration::from_std(self.scheduler.idle_timeout())
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let sessions = self.sessions.lock();
        sessions
            .iter()
            .filter(|(_, record)| match record.status {
                SessionStatus::PendingDeletion => true,
                SessionStatus::Active => now - record.last_active > idle_timeout,
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The per-session turn gate, for in-order prompt handling.
    pub fn turn_gate(&self, id: &SessionId) -> Option<Arc<tokio::sync::Mutex<()>>> {
        let sessions = self.sessions.lock();
        sessions.get(id).map(|r| Arc::clone(&r.turn_gate))
    }

    /// Whether the session currently has a live (armed, unfired) timer.
    pub fn has_timer(&self, id: &SessionId) -> bool {
        let sessions = self.sessions.lock();
        sessions
            .get(id)
            .and_then(|r| r.timer.as_ref())
            .is_some_and(|t| !t.is_finished())
    }

    /// Number of stored sessions (any status).
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Test hook: rewind `last_active` to simulate idle age without waiting.
    #[cfg(test)]
    pub(crate) fn backdate_last_active(&self, id: &SessionId, when: DateTime<Utc>) {
        let mut sessions = self.sessions.lock();
        if let Some(record) = sessions.get_mut(id) {
            record.last_active = when;
        }
    }
}

fn snapshot(id: &SessionId, record: &SessionRecord) -> SessionSnapshot {
    SessionSnapshot {
        id: id.clone(),
        thread_id: record.thread_id.clone(),
        created_at: record.created_at,
        last_active: record.last_active,
        status: record.status,
    }
}
