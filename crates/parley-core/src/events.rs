//! Event types for the conversational gateway.
//!
//! Two event families:
//!
//! - **[`ReplyEvent`]**: Low-level reply streaming events from the
//!   conversation backend for one turn (created, text deltas,
//!   completed/failed).
//! - **[`ClientEvent`]** / **[`ServerEvent`]**: The WebSocket wire protocol.
//!   Every server event carries session context via a flattened
//!   [`BaseEvent`].
//!
//! `ReplyEvent` is purely in-memory (never persisted). `ServerEvent` is
//! what gets serialized and fanned out to connected clients; web and mobile
//! clients rely on the exact type strings and field names.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

// ─────────────────────────────────────────────────────────────────────────────
// ReplyEvent — backend reply streaming events
// ─────────────────────────────────────────────────────────────────────────────

/// Events produced by the conversation backend while streaming one reply.
///
/// These are transient and drive the per-turn stream coordination; the
/// transport never sees them directly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReplyEvent {
    /// Reply generation started.
    #[serde(rename = "created")]
    Created,

    /// Incremental reply content.
    #[serde(rename = "delta")]
    Delta {
        /// Text fragment added by this event.
        fragment: String,
        /// Cumulative reply text up to and including this fragment.
        snapshot: String,
    },

    /// Reply finished successfully.
    #[serde(rename = "completed")]
    Completed,

    /// Reply generation failed mid-stream.
    #[serde(rename = "failed")]
    Failed {
        /// Error message from the backend.
        error: String,
    },
}

impl ReplyEvent {
    /// Whether this event terminates the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ClientEvent — client→server wire protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Messages a client may send over the WebSocket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Request a brand-new session.
    #[serde(rename = "init_session")]
    InitSession,

    /// Attempt to continue a prior session.
    #[serde(rename = "resume_session")]
    ResumeSession {
        /// The session to resume.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    /// Submit one user turn.
    #[serde(rename = "send_prompt")]
    SendPrompt {
        /// The prompt text.
        prompt: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// ServerEvent — server→client wire protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Common fields for all server events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Session this event belongs to.
    pub session_id: SessionId,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Create a new base event with the current UTC timestamp.
    #[must_use]
    pub fn now(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Server→client event, fanned out to the session's connections
/// (or to all connections for [`ServerEvent::ClearChat`]).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// New session established. `info` is present only when the session was
    /// substituted for a rejected resume (unknown or expired id).
    #[serde(rename = "session_created")]
    SessionCreated {
        /// Session context.
        #[serde(flatten)]
        base: BaseEvent,
        /// Why a fresh session was substituted, if it was.
        #[serde(skip_serializing_if = "Option::is_none")]
        info: Option<String>,
    },

    /// Resume accepted.
    #[serde(rename = "session_resumed")]
    SessionResumed {
        /// Session context.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// Reply generation started for the current turn.
    #[serde(rename = "text_created")]
    TextCreated {
        /// Session context.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// Incremental reply content.
    #[serde(rename = "text_delta")]
    TextDelta {
        /// Session context.
        #[serde(flatten)]
        base: BaseEvent,
        /// Text fragment added by this event.
        fragment: String,
        /// Cumulative reply text so far.
        snapshot: String,
    },

    /// Terminal success for the turn.
    #[serde(rename = "response_complete")]
    ResponseComplete {
        /// Session context.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// Best-effort quick replies for the completed turn.
    #[serde(rename = "suggestions")]
    Suggestions {
        /// Session context.
        #[serde(flatten)]
        base: BaseEvent,
        /// Suggested follow-up prompts.
        suggestions: Vec<String>,
    },

    /// Terminal or non-fatal turn failure.
    #[serde(rename = "error")]
    Error {
        /// Session context.
        #[serde(flatten)]
        base: BaseEvent,
        /// Human-readable message.
        message: String,
        /// Optional diagnostic detail.
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// Broadcast: a session's remote state was torn down.
    #[serde(rename = "clear_chat")]
    ClearChat {
        /// Session context.
        #[serde(flatten)]
        base: BaseEvent,
    },
}

impl ServerEvent {
    /// Get the base event fields.
    #[must_use]
    pub fn base(&self) -> &BaseEvent {
        match self {
            Self::SessionCreated { base, .. }
            | Self::SessionResumed { base }
            | Self::TextCreated { base }
            | Self::TextDelta { base, .. }
            | Self::ResponseComplete { base }
            | Self::Suggestions { base, .. }
            | Self::Error { base, .. }
            | Self::ClearChat { base } => base,
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.base().session_id
    }

    /// Get the event type string (for type discrimination).
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::SessionResumed { .. } => "session_resumed",
            Self::TextCreated { .. } => "text_created",
            Self::TextDelta { .. } => "text_delta",
            Self::ResponseComplete { .. } => "response_complete",
            Self::Suggestions { .. } => "suggestions",
            Self::Error { .. } => "error",
            Self::ClearChat { .. } => "clear_chat",
        }
    }

    /// Whether this event should be broadcast to every connection rather
    /// than only the owning session's.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::ClearChat { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Create an error event with no details.
#[must_use]
pub fn error_event(session_id: impl Into<SessionId>, message: impl Into<String>) -> ServerEvent {
    ServerEvent::Error {
        base: BaseEvent::now(session_id),
        message: message.into(),
        details: None,
    }
}

/// Create a clear-chat broadcast event.
#[must_use]
pub fn clear_chat_event(session_id: impl Into<SessionId>) -> ServerEvent {
    ServerEvent::ClearChat {
        base: BaseEvent::now(session_id),
    }
}
