//! Session error types.

use parley_backend::BackendError;
use parley_core::ids::SessionId;
use thiserror::Error;

/// Errors surfaced to the client for a rejected or failed turn.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session does not exist or is no longer serving operations.
    #[error("unknown or expired session: {0}")]
    InvalidSession(SessionId),

    /// The conversation backend failed; the session stays usable.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_session_names_the_id() {
        let err = SessionError::InvalidSession("sess_x".into());
        assert!(err.to_string().contains("sess_x"));
    }

    #[test]
    fn backend_error_is_transparent() {
        let err = SessionError::from(BackendError::ThreadNotFound);
        assert_eq!(err.to_string(), "thread not found");
    }
}
