use thiserror::Error;

use crate::session::SessionId;

/// Errors surfaced by the cache, session and rerun layers
#[derive(Debug, Clone, Error)]
pub enum EncoreError {
    #[error("Argument `{argument}` cannot be fingerprinted: {reason}")]
    UnhashableArgument { argument: String, reason: String },

    #[error("Computation for {fingerprint} failed: {message}")]
    ComputeFailure {
        fingerprint: String,
        message: String,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Script failed in session {session_id}: {message}")]
    ScriptExecution {
        session_id: SessionId,
        message: String,
    },

    #[error("Session {0} was destroyed while a rerun was in flight")]
    Canceled(SessionId),

    #[error("Cached value for {fingerprint} is not a `{expected}`")]
    TypeMismatch {
        fingerprint: String,
        expected: &'static str,
    },

    #[error("Session limit reached ({0} active sessions)")]
    SessionLimitReached(usize),

    #[error("Session state value for `{key}` is invalid: {reason}")]
    StateValue { key: String, reason: String },
}

impl EncoreError {
    /// Whether the error comes from the owning session being torn down
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}

pub type Result<T, E = EncoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EncoreError::SessionNotFound(SessionId::from("abc"));
        assert_eq!(err.to_string(), "Session not found: abc");

        let err = EncoreError::UnhashableArgument {
            argument: "kwarg `rows`".to_string(),
            reason: "key must be a string".to_string(),
        };
        assert!(err.to_string().contains("kwarg `rows`"));
    }

    #[test]
    fn test_is_canceled() {
        assert!(EncoreError::Canceled(SessionId::from("a")).is_canceled());
        assert!(!EncoreError::SessionLimitReached(3).is_canceled());
    }
}
