//! Shared error type used across all Orchid crates.

/// Kernel error taxonomy. Control-flow outcomes (abort, timeout) are
/// variants, not panics — retry and parallel helpers branch on them.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid configuration or missing required input. Not retryable.
    #[error("usage: {0}")]
    Usage(String),

    /// Recording, session, or prompt id unknown. 404-shaped.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation invalid for the current state. 409-shaped.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Upstream failure during provider streaming.
    #[error("provider {provider}: {message}")]
    Provider {
        provider: String,
        message: String,
        /// Retryable unless the provider marked it fatal.
        retryable: bool,
    },

    /// Payload failed schema/validator checks. In HITL, re-ask the user.
    #[error("validation: {0}")]
    Validation(String),

    /// Operation exceeded its budget. Retryable at caller's discretion.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Cooperative cancellation. Terminal for the surrounding operation.
    #[error("aborted: {0}")]
    Aborted(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Invariant violated. Logged and surfaced.
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn provider_fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether a retry policy may re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Timeout(_) | Self::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_carry_retryability() {
        assert!(Error::provider("mock", "flaky").is_retryable());
        assert!(!Error::provider_fatal("mock", "bad key").is_retryable());
    }

    #[test]
    fn aborted_and_timeout_predicates() {
        assert!(Error::Aborted("pause".into()).is_aborted());
        assert!(Error::Timeout("prompt".into()).is_timeout());
        assert!(!Error::Usage("x".into()).is_aborted());
    }

    #[test]
    fn display_includes_kind() {
        let err = Error::Conflict("recording finalized".into());
        assert_eq!(err.to_string(), "conflict: recording finalized");
    }
}
