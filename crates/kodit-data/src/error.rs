//! Structured error handling for the data layer
//!
//! Provides error types carrying the database operation that failed, so a
//! log line or task failure names the exact write that broke.

use kodit_common::{ErrorKind, IntoErrorKind};
use std::fmt;
use thiserror::Error;

/// Result type alias for database operations
pub type DatabaseResult<T> = std::result::Result<T, DatabaseError>;

/// Database operation type for error context
#[derive(Debug, Clone)]
pub enum DatabaseOperation {
    SaveRepository { url: String },
    GetRepository { id: i64 },
    SaveCommit { sha: String },
    SaveFiles { commit_sha: String, count: usize },
    SaveSnippets { commit_sha: String, count: usize },
    SaveEnrichment { entity_id: String },
    EnqueueTask { operation: String },
    DequeueTask,
    CompleteTask { id: i64 },
    FailTask { id: i64 },
    UpsertStatus { operation: String },
    Migration { version: i64 },
    Query { description: String },
}

impl fmt::Display for DatabaseOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SaveRepository { url } => write!(f, "save_repository(url={url})"),
            Self::GetRepository { id } => write!(f, "get_repository(id={id})"),
            Self::SaveCommit { sha } => write!(f, "save_commit(sha={sha})"),
            Self::SaveFiles { commit_sha, count } => {
                write!(f, "save_files(commit={commit_sha}, count={count})")
            }
            Self::SaveSnippets { commit_sha, count } => {
                write!(f, "save_snippets(commit={commit_sha}, count={count})")
            }
            Self::SaveEnrichment { entity_id } => {
                write!(f, "save_enrichment(entity={entity_id})")
            }
            Self::EnqueueTask { operation } => write!(f, "enqueue_task(op={operation})"),
            Self::DequeueTask => write!(f, "dequeue_task"),
            Self::CompleteTask { id } => write!(f, "complete_task(id={id})"),
            Self::FailTask { id } => write!(f, "fail_task(id={id})"),
            Self::UpsertStatus { operation } => write!(f, "upsert_status(op={operation})"),
            Self::Migration { version } => write!(f, "migration(v{version})"),
            Self::Query { description } => write!(f, "query({description})"),
        }
    }
}

/// Database error with operation context
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("query failed for operation '{operation}': {message}")]
    QueryFailed {
        operation: Box<DatabaseOperation>,
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("constraint violation '{constraint}' during '{operation}'")]
    ConstraintViolation {
        constraint: String,
        operation: Box<DatabaseOperation>,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to create connection pool for {url}: {message}")]
    PoolCreationFailed {
        url: String,
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration failed at version {version}: {message}")]
    MigrationFailed { version: i64, message: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("corrupt row during '{operation}': {message}")]
    CorruptRow {
        operation: Box<DatabaseOperation>,
        message: String,
    },

    #[error("database configuration error: {message}")]
    Configuration { message: String },
}

impl DatabaseError {
    /// Create a query failed error from `sqlx::Error`, promoting
    /// constraint violations into their own variant.
    pub fn query_failed(operation: DatabaseOperation, source: sqlx::Error) -> Self {
        if let Some(db_err) = source.as_database_error()
            && let Some(constraint) = db_err.constraint()
        {
            return Self::ConstraintViolation {
                constraint: constraint.to_string(),
                operation: Box::new(operation),
                source,
            };
        }

        Self::QueryFailed {
            operation: Box::new(operation),
            message: source.to_string(),
            source,
        }
    }

    pub fn corrupt_row(operation: DatabaseOperation, message: impl Into<String>) -> Self {
        Self::CorruptRow {
            operation: Box::new(operation),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }
}

impl IntoErrorKind for DatabaseError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::QueryFailed { .. } => ErrorKind::Transient,
            Self::ConstraintViolation { .. } => ErrorKind::Validation,
            Self::PoolCreationFailed { .. } | Self::Configuration { .. } => {
                ErrorKind::Configuration
            }
            Self::MigrationFailed { .. } | Self::CorruptRow { .. } => ErrorKind::Other,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}

/// Extension trait for converting sqlx errors with context
pub trait DatabaseErrorExt<T> {
    /// Convert to `DatabaseError` with operation context
    ///
    /// # Errors
    /// Returns `DatabaseError` wrapping the sqlx failure
    fn map_db_err(self, operation: DatabaseOperation) -> DatabaseResult<T>;
}

impl<T> DatabaseErrorExt<T> for std::result::Result<T, sqlx::Error> {
    fn map_db_err(self, operation: DatabaseOperation) -> DatabaseResult<T> {
        self.map_err(|e| DatabaseError::query_failed(operation, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_display() {
        let op = DatabaseOperation::SaveSnippets {
            commit_sha: "abc123".to_string(),
            count: 42,
        };
        assert_eq!(op.to_string(), "save_snippets(commit=abc123, count=42)");
    }

    #[test]
    fn test_not_found_classifies_as_not_found() {
        let err = DatabaseError::not_found("repository", "17");
        assert_eq!(err.error_kind(), kodit_common::ErrorKind::NotFound);
    }

    #[test]
    fn test_query_failure_classifies_as_transient() {
        let err = DatabaseError::query_failed(
            DatabaseOperation::DequeueTask,
            sqlx::Error::PoolTimedOut,
        );
        assert_eq!(err.error_kind(), kodit_common::ErrorKind::Transient);
    }
}
