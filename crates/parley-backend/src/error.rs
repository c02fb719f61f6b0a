//! Backend error types.

use thiserror::Error;

/// Errors from the conversation backend or suggestion generator.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport-level HTTP failure (connect, timeout, body read).
    #[error("backend transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The referenced thread does not exist on the backend.
    ///
    /// Cleanup treats this as success — the resource is already gone.
    #[error("thread not found")]
    ThreadNotFound,

    /// The backend returned a body we could not decode.
    #[error("invalid backend response: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackendError {
    /// Whether this error means the remote resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ThreadNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_predicate() {
        assert!(BackendError::ThreadNotFound.is_not_found());
        assert!(
            !BackendError::Api {
                status: 500,
                message: "boom".into()
            }
            .is_not_found()
        );
    }

    #[test]
    fn api_error_display() {
        let err = BackendError::Api {
            status: 503,
            message: "overloaded".into(),
        };
        assert_eq!(
            err.to_string(),
            "backend API error (status 503): overloaded"
        );
    }
}
