//! # parley-backend
//!
//! External collaborator clients for the Parley gateway.
//!
//! The session core consumes two narrow interfaces:
//!
//! - [`ConversationBackend`] — thread lifecycle and streamed replies
//! - [`SuggestionGenerator`] — best-effort quick replies after a turn
//!
//! Both are treated as stateless remote services. The HTTP implementations
//! ([`HttpBackend`], [`HttpSuggestionGenerator`]) talk JSON over reqwest,
//! with reply streaming delivered as server-sent events.

#![deny(unsafe_code)]

pub mod error;
pub mod http;
pub mod traits;

pub use error::BackendError;
pub use http::{HttpBackend, HttpSuggestionGenerator};
pub use traits::{ConversationBackend, ReplyStream, SuggestionGenerator};
