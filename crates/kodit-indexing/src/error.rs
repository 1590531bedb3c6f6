//! Indexing pipeline error types
//!
//! One enum spans everything a handler can hit; the worker classifies
//! through [`IntoErrorKind`] to pick the retry or terminal-failure path.

use kodit_common::{ErrorKind, IntoErrorKind};
use thiserror::Error;

pub type IndexingResult<T> = std::result::Result<T, IndexingError>;

#[derive(Debug, Error)]
pub enum IndexingError {
    #[error(transparent)]
    Database(#[from] kodit_data::DatabaseError),

    #[error(transparent)]
    Git(#[from] kodit_git::GitError),

    #[error(transparent)]
    Provider(#[from] kodit_providers::ProviderError),

    #[error(transparent)]
    Search(#[from] kodit_search::SearchError),

    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("task payload missing {0}")]
    MissingPayload(&'static str),
}

impl IndexingError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

impl IntoErrorKind for IndexingError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Database(e) => e.error_kind(),
            Self::Git(e) => e.error_kind(),
            Self::Provider(e) => e.error_kind(),
            Self::Search(e) => e.error_kind(),
            Self::Validation(_) | Self::MissingPayload(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}
