// src/error.rs
// Engine error taxonomy. Backend failures are normalized here at the engine
// boundary; cancellation is a pseudo-kind that never reaches the user.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Network or backend failure during identification/resolution.
    #[error("{user_message}")]
    Server {
        user_message: String,
        retryable: bool,
        support_ref: Option<String>,
    },

    /// Failure while fetching enrichment data.
    #[error("{user_message}")]
    Enrichment { user_message: String, retryable: bool },

    /// The call was superseded or explicitly cancelled. Filtered out before
    /// error presentation; must never produce a transcript entry.
    #[error("request cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn server(user_message: impl Into<String>) -> Self {
        Self::Server {
            user_message: user_message.into(),
            retryable: true,
            support_ref: None,
        }
    }

    pub fn server_fatal(user_message: impl Into<String>, support_ref: Option<String>) -> Self {
        Self::Server {
            user_message: user_message.into(),
            retryable: false,
            support_ref,
        }
    }

    pub fn enrichment(user_message: impl Into<String>) -> Self {
        Self::Enrichment {
            user_message: user_message.into(),
            retryable: true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn retryable(&self) -> bool {
        match self {
            Self::Server { retryable, .. } | Self::Enrichment { retryable, .. } => *retryable,
            Self::Cancelled => false,
        }
    }

    pub fn user_message(&self) -> &str {
        match self {
            Self::Server { user_message, .. } | Self::Enrichment { user_message, .. } => {
                user_message
            }
            Self::Cancelled => "",
        }
    }

    pub fn support_ref(&self) -> Option<&str> {
        match self {
            Self::Server { support_ref, .. } => support_ref.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert!(!EngineError::Cancelled.retryable());
        assert!(EngineError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_server_error_defaults_retryable() {
        let err = EngineError::server("backend unavailable");
        assert!(err.retryable());
        assert_eq!(err.user_message(), "backend unavailable");
        assert!(err.support_ref().is_none());
    }
}
