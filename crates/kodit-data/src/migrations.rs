//! Versioned schema migrations
//!
//! DDL is generated per dialect (auto-increment keys and binary columns
//! differ); everything else is the shared TEXT/BIGINT subset. Statements
//! for one version run inside a single transaction.

use sqlx::Row;

use crate::error::{DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult};
use crate::pool::{DbPool, Dialect};

/// Run all pending migrations
///
/// # Errors
///
/// Returns an error if a migration statement fails; already-applied
/// versions are skipped.
pub async fn run_migrations(db: &DbPool) -> DatabaseResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version BIGINT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(db.inner())
    .await
    .map_db_err(DatabaseOperation::Migration { version: 0 })?;

    let applied: Vec<i64> = sqlx::query("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(db.inner())
        .await
        .map_db_err(DatabaseOperation::Migration { version: 0 })?
        .iter()
        .map(|row| row.get(0))
        .collect();

    for (version, name, statements) in migrations(db.dialect()) {
        if applied.contains(&version) {
            tracing::debug!("migration {version} ({name}) already applied");
            continue;
        }

        tracing::info!("applying migration {version} ({name})");

        let mut tx = db
            .inner()
            .begin()
            .await
            .map_db_err(DatabaseOperation::Migration { version })?;

        for statement in &statements {
            sqlx::query(statement).execute(&mut *tx).await.map_err(|e| {
                DatabaseError::MigrationFailed {
                    version,
                    message: format!("{e} (statement: {statement})"),
                }
            })?;
        }

        sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES ($1, $2, $3)")
            .bind(version)
            .bind(name)
            .bind(crate::models::format_ts(chrono::Utc::now()))
            .execute(&mut *tx)
            .await
            .map_db_err(DatabaseOperation::Migration { version })?;

        tx.commit()
            .await
            .map_db_err(DatabaseOperation::Migration { version })?;
    }

    Ok(())
}

/// Migration definitions: `(version, name, statements)`
fn migrations(dialect: Dialect) -> Vec<(i64, &'static str, Vec<String>)> {
    let pk = dialect.pk_clause();

    vec![(
        1,
        "initial_schema",
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS repositories (
                    id {pk},
                    remote_url TEXT NOT NULL,
                    sanitized_url TEXT NOT NULL UNIQUE,
                    clone_path TEXT,
                    tracking_kind TEXT,
                    tracking_value TEXT,
                    last_synced_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"
            ),
            "CREATE TABLE IF NOT EXISTS git_commits (
                repo_id BIGINT NOT NULL,
                sha TEXT NOT NULL,
                parent_sha TEXT,
                author_name TEXT NOT NULL,
                author_email TEXT NOT NULL,
                message TEXT NOT NULL,
                committed_at TEXT NOT NULL,
                PRIMARY KEY (repo_id, sha)
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS git_branches (
                repo_id BIGINT NOT NULL,
                name TEXT NOT NULL,
                head_sha TEXT NOT NULL,
                is_default BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (repo_id, name)
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS git_tags (
                repo_id BIGINT NOT NULL,
                name TEXT NOT NULL,
                target_sha TEXT NOT NULL,
                PRIMARY KEY (repo_id, name)
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS git_commit_files (
                repo_id BIGINT NOT NULL,
                commit_sha TEXT NOT NULL,
                path TEXT NOT NULL,
                blob_sha TEXT NOT NULL,
                size BIGINT NOT NULL,
                mime_type TEXT,
                PRIMARY KEY (commit_sha, blob_sha)
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS snippets (
                sha TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                extension TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS snippet_commit_associations (
                snippet_sha TEXT NOT NULL,
                commit_sha TEXT NOT NULL,
                repo_id BIGINT NOT NULL,
                PRIMARY KEY (snippet_sha, commit_sha)
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS snippet_file_derivations (
                snippet_sha TEXT NOT NULL,
                file_path TEXT NOT NULL,
                PRIMARY KEY (snippet_sha, file_path)
            )"
            .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS enrichments_v2 (
                    id {pk},
                    kind TEXT NOT NULL,
                    subtype TEXT,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )"
            ),
            "CREATE TABLE IF NOT EXISTS enrichment_associations (
                enrichment_id BIGINT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                PRIMARY KEY (enrichment_id, entity_type, entity_id)
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS kodit_bm25_documents (
                snippet_sha TEXT NOT NULL,
                commit_sha TEXT NOT NULL,
                terms TEXT NOT NULL,
                doc_len BIGINT NOT NULL,
                PRIMARY KEY (snippet_sha, commit_sha)
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS kodit_code_embeddings (
                snippet_sha TEXT NOT NULL,
                commit_sha TEXT NOT NULL,
                embedding TEXT NOT NULL,
                PRIMARY KEY (snippet_sha, commit_sha)
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS kodit_text_embeddings (
                snippet_sha TEXT NOT NULL,
                commit_sha TEXT NOT NULL,
                embedding TEXT NOT NULL,
                PRIMARY KEY (snippet_sha, commit_sha)
            )"
            .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS tasks (
                    id {pk},
                    operation TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    repository_id BIGINT NOT NULL,
                    priority BIGINT NOT NULL DEFAULT 0,
                    state TEXT NOT NULL DEFAULT 'pending',
                    retry_count BIGINT NOT NULL DEFAULT 0,
                    last_error TEXT,
                    visible_after TEXT,
                    created_at TEXT NOT NULL
                )"
            ),
            "CREATE INDEX IF NOT EXISTS idx_tasks_dequeue
                ON tasks (state, priority, id)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS idx_tasks_repository
                ON tasks (repository_id, state)"
                .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS task_statuses (
                    id {pk},
                    trackable_type TEXT NOT NULL,
                    trackable_id BIGINT NOT NULL,
                    operation TEXT NOT NULL,
                    state TEXT NOT NULL,
                    current_count BIGINT NOT NULL DEFAULT 0,
                    total_count BIGINT NOT NULL DEFAULT 0,
                    error TEXT,
                    message TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (trackable_type, trackable_id, operation)
                )"
            ),
            "CREATE INDEX IF NOT EXISTS idx_snippet_assoc_commit
                ON snippet_commit_associations (commit_sha)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS idx_commit_files_commit
                ON git_commit_files (commit_sha)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS idx_enrichment_assoc_entity
                ON enrichment_associations (entity_type, entity_id)"
                .to_string(),
        ],
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = DbPool::connect("sqlite::memory:", 1).await.unwrap();
        run_migrations(&db).await.unwrap();
        run_migrations(&db).await.unwrap();

        let rows = sqlx::query("SELECT version FROM schema_migrations")
            .fetch_all(db.inner())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_all_tables_exist_after_migration() {
        let db = DbPool::initialize("sqlite::memory:", 1).await.unwrap();

        for table in [
            "repositories",
            "git_commits",
            "git_branches",
            "git_tags",
            "git_commit_files",
            "snippets",
            "snippet_commit_associations",
            "snippet_file_derivations",
            "enrichments_v2",
            "enrichment_associations",
            "kodit_bm25_documents",
            "kodit_code_embeddings",
            "kodit_text_embeddings",
            "tasks",
            "task_statuses",
        ] {
            sqlx::query(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(db.inner())
                .await
                .unwrap_or_else(|e| panic!("table {table} missing: {e}"));
        }
    }
}
