//! Typed provider errors
//!
//! Callers need to tell rate limits and transient server failures (worth
//! a retry) apart from oversized inputs and hard API rejections (not).

use kodit_common::{ErrorKind, IntoErrorKind};
use thiserror::Error;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited by provider{}", retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("input exceeds the provider context window: {message}")]
    ContextTooLong { message: String },

    #[error("transient provider failure (status {status}): {message}")]
    Transient { status: u16, message: String },

    #[error("provider rejected the request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed provider response: {0}")]
    InvalidResponse(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl ProviderError {
    /// Whether another attempt could reasonably succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transient { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::ContextTooLong { .. }
            | Self::Rejected { .. }
            | Self::InvalidResponse(_)
            | Self::RetriesExhausted { .. } => false,
        }
    }

    /// Classify an HTTP error status from a provider endpoint
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited {
                retry_after_secs: None,
            },
            500..=599 => Self::Transient {
                status,
                message: body,
            },
            400 if body.contains("context") || body.contains("token") => {
                Self::ContextTooLong { message: body }
            }
            _ => Self::Rejected {
                status,
                message: body,
            },
        }
    }
}

impl IntoErrorKind for ProviderError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } | Self::Transient { .. } | Self::Http(_) => {
                ErrorKind::Transient
            }
            Self::ContextTooLong { .. } | Self::Rejected { .. } => ErrorKind::Validation,
            Self::InvalidResponse(_) => ErrorKind::Other,
            Self::RetriesExhausted { .. } => ErrorKind::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ProviderError::from_status(429, String::new()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(503, "overloaded".into()),
            ProviderError::Transient { status: 503, .. }
        ));
        assert!(matches!(
            ProviderError::from_status(400, "maximum context length exceeded".into()),
            ProviderError::ContextTooLong { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(401, "bad key".into()),
            ProviderError::Rejected { status: 401, .. }
        ));
    }

    #[test]
    fn test_retryability() {
        assert!(ProviderError::from_status(429, String::new()).is_retryable());
        assert!(ProviderError::from_status(500, String::new()).is_retryable());
        assert!(!ProviderError::from_status(401, String::new()).is_retryable());
        assert!(!ProviderError::from_status(400, "context".into()).is_retryable());
    }
}
