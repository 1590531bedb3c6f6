//! Git adapter error types

use kodit_common::{ErrorKind, IntoErrorKind};
use thiserror::Error;

pub type GitResult<T> = std::result::Result<T, GitError>;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to fetch {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: git2::Error,
    },

    #[error("not a repository at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: git2::Error,
    },

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    #[error("invalid commit sha: {0}")]
    InvalidSha(String),

    #[error("git operation failed: {0}")]
    Operation(#[from] git2::Error),

    #[error("blocking git task aborted: {0}")]
    TaskJoin(String),
}

impl IntoErrorKind for GitError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            // Clone and fetch hit the network; worth a retry
            Self::Clone { .. } | Self::Fetch { .. } | Self::TaskJoin(_) => ErrorKind::Transient,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidSha(_) => ErrorKind::Validation,
            Self::Open { .. } | Self::Operation(_) => ErrorKind::Other,
        }
    }
}
