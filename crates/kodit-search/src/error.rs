//! Search-layer error types

use kodit_common::{ErrorKind, IntoErrorKind};
use thiserror::Error;

pub type SearchResult<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Database(#[from] kodit_data::DatabaseError),

    #[error(transparent)]
    Provider(#[from] kodit_providers::ProviderError),

    #[error("{failed} of {total} batches failed")]
    BatchFailures { failed: usize, total: usize },

    #[error("corrupt embedding for snippet {snippet_sha}: {message}")]
    CorruptEmbedding {
        snippet_sha: String,
        message: String,
    },
}

impl IntoErrorKind for SearchError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Database(e) => e.error_kind(),
            Self::Provider(e) => e.error_kind(),
            Self::BatchFailures { .. } => ErrorKind::Partial,
            Self::CorruptEmbedding { .. } => ErrorKind::Other,
        }
    }
}
