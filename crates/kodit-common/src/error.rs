//! Cross-crate error classification
//!
//! Every fallible seam in kodit classifies its errors into a small set of
//! kinds; the worker consults the kind to decide whether a failed task is
//! retried or terminally failed, and the service layer uses it to choose
//! how a failure surfaces to the caller.

/// Classification of an error for retry and surfacing decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid option at startup; fatal
    Configuration,
    /// Looked-up entity absent; surfaced, never retried
    NotFound,
    /// Network timeout, HTTP 429/5xx, database serialization failure;
    /// retried with backoff
    Transient,
    /// Invalid user input (duplicate URL, bad commit SHA); surfaced,
    /// not retried
    Validation,
    /// Some batches failed within a larger operation
    Partial,
    /// Anything else; treated as transient by the queue so a crash-y
    /// handler still gets its retry budget
    Other,
}

impl ErrorKind {
    /// Whether the queue should re-run a task that failed with this kind
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Other)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::NotFound => "not_found",
            Self::Transient => "transient",
            Self::Validation => "validation",
            Self::Partial => "partial",
            Self::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// Implemented by every crate-level error enum so callers can classify
/// without matching on foreign variants.
pub trait IntoErrorKind {
    fn error_kind(&self) -> ErrorKind;
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("bad input: {0}")]
        BadInput(String),
        #[error("timeout")]
        Timeout,
    }

    impl IntoErrorKind for TestError {
        fn error_kind(&self) -> ErrorKind {
            match self {
                Self::BadInput(_) => ErrorKind::Validation,
                Self::Timeout => ErrorKind::Transient,
            }
        }
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Other.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Configuration.is_retryable());
    }

    #[test]
    fn test_classification_via_trait() {
        let err = TestError::BadInput("x".into());
        assert_eq!(err.error_kind(), ErrorKind::Validation);
        assert!(!err.error_kind().is_retryable());

        assert!(TestError::Timeout.error_kind().is_retryable());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(ErrorKind::Partial.to_string(), "partial");
    }
}
