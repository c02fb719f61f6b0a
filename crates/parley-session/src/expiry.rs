//! Per-session idle timers and the periodic backstop sweep.
//!
//! A timer is a spawned task that sleeps the idle timeout and then enqueues
//! its session on the cleanup channel. Replace semantics live in the
//! registry: the old handle is aborted under the same lock that installs the
//! new one, so a session can never have two live timers. A timer that fires
//! for an already-removed session is harmless — the cleanup path re-checks
//! registry state before acting.
//!
//! The sweep exists as a backstop: it feeds every `list_expired` result
//! through the same cleanup channel on a fixed interval, guaranteeing
//! eventual convergence even if an individual timer is ever lost, and it is
//! the retry driver for teardowns whose remote delete failed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_core::ids::SessionId;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::registry::SessionRegistry;

/// Handle to one armed idle timer. Owned by the session record; dropping the
/// record without calling [`cancel`](Self::cancel) leaves the task running,
/// so the registry cancels explicitly on every replace and removal.
#[derive(Debug)]
pub struct ExpirationTimer {
    handle: AbortHandle,
}

impl ExpirationTimer {
    /// Cancel the timer so it never fires.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the underlying task has finished (fired or aborted).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Schedules per-session expiration callbacks and the backstop sweep.
pub struct ExpirationScheduler {
    cleanup_tx: mpsc::UnboundedSender<SessionId>,
    idle_timeout: Duration,
}

impl ExpirationScheduler {
    /// Create a scheduler that enqueues expired sessions on `cleanup_tx`.
    pub fn new(cleanup_tx: mpsc::UnboundedSender<SessionId>, idle_timeout: Duration) -> Self {
        Self {
            cleanup_tx,
            idle_timeout,
        }
    }

    /// The configured idle timeout.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Arm a fresh timer for `session_id`.
    ///
    /// The caller (the registry) is responsible for cancelling any previous
    /// timer for the same session before installing this one.
    pub fn arm(&self, session_id: SessionId) -> ExpirationTimer {
        let tx = self.cleanup_tx.clone();
        let timeout = self.idle_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            trace!(session_id = %session_id, "idle timer fired");
            let _ = tx.send(session_id);
        });
        ExpirationTimer {
            handle: task.abort_handle(),
        }
    }

    /// Spawn the periodic backstop sweep.
    ///
    /// Every `interval`, each session returned by
    /// [`SessionRegistry::list_expired`] is fed through the cleanup channel.
    /// Stops when `shutdown` is cancelled.
    pub fn spawn_sweep(
        &self,
        registry: Arc<SessionRegistry>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let tx = self.cleanup_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // An interval's first tick completes immediately; nothing can be
            // expired at startup, so consume it before the loop.
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = registry.list_expired(Utc::now());
                        if !expired.is_empty() {
                            debug!(count = expired.len(), "sweep found expired sessions");
                        }
                        for id in expired {
                            let _ = tx.send(id);
                        }
                    }
                }
            }
        })
    }
}
