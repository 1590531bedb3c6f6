//! SQL implementations of the entity store traits
//!
//! One `SqlStore` implements every entity trait over the shared pool.
//! All SQL stays inside the subset both dialects execute verbatim:
//! `$N` placeholders, `ON CONFLICT` upserts, `RETURNING` clauses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;
use std::collections::HashMap;

use crate::error::{DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult};
use crate::models::{
    format_ts, parse_ts, CommitFile, Enrichment, EnrichmentEntityType, EnrichmentType, GitBranch,
    GitCommit, GitTag, Repository, Snippet, TrackingConfig,
};
use crate::pool::DbPool;
use crate::traits::{CommitStore, EnrichmentStore, RepositoryStore, SnippetStore};

/// SQL-backed entity stores
#[derive(Clone)]
pub struct SqlStore {
    db: DbPool,
}

impl SqlStore {
    pub const fn new(db: DbPool) -> Self {
        Self { db }
    }
}

/// `$start..$start+count` placeholder list for dynamic IN clauses
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_ts(row: &AnyRow, column: &str, op: &str) -> DatabaseResult<DateTime<Utc>> {
    let raw: String = row.try_get(column).map_err(|e| {
        DatabaseError::corrupt_row(
            DatabaseOperation::Query {
                description: op.to_string(),
            },
            format!("missing column {column}: {e}"),
        )
    })?;
    parse_ts(&raw).map_err(|e| {
        DatabaseError::corrupt_row(
            DatabaseOperation::Query {
                description: op.to_string(),
            },
            format!("bad timestamp in {column}: {e}"),
        )
    })
}

fn read_opt_ts(row: &AnyRow, column: &str, op: &str) -> DatabaseResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column).unwrap_or(None);
    raw.map(|r| {
        parse_ts(&r).map_err(|e| {
            DatabaseError::corrupt_row(
                DatabaseOperation::Query {
                    description: op.to_string(),
                },
                format!("bad timestamp in {column}: {e}"),
            )
        })
    })
    .transpose()
}

fn row_repository(row: &AnyRow) -> DatabaseResult<Repository> {
    let tracking_kind: Option<String> = row.try_get("tracking_kind").unwrap_or(None);
    let tracking_value: Option<String> = row.try_get("tracking_value").unwrap_or(None);
    Ok(Repository {
        id: row.get("id"),
        remote_url: row.get("remote_url"),
        sanitized_url: row.get("sanitized_url"),
        clone_path: row.try_get("clone_path").unwrap_or(None),
        tracking: TrackingConfig::from_columns(tracking_kind.as_deref(), tracking_value.as_deref()),
        last_synced_at: read_opt_ts(row, "last_synced_at", "map_repository")?,
        created_at: read_ts(row, "created_at", "map_repository")?,
        updated_at: read_ts(row, "updated_at", "map_repository")?,
    })
}

fn row_commit(row: &AnyRow) -> DatabaseResult<GitCommit> {
    Ok(GitCommit {
        repo_id: row.get("repo_id"),
        sha: row.get("sha"),
        parent_sha: row.try_get("parent_sha").unwrap_or(None),
        author_name: row.get("author_name"),
        author_email: row.get("author_email"),
        message: row.get("message"),
        committed_at: read_ts(row, "committed_at", "map_commit")?,
    })
}

fn row_snippet(row: &AnyRow) -> DatabaseResult<Snippet> {
    Ok(Snippet {
        sha: row.get("sha"),
        content: row.get("content"),
        extension: row.get("extension"),
        derives_from: Vec::new(),
        created_at: read_ts(row, "created_at", "map_snippet")?,
    })
}

const REPOSITORY_COLUMNS: &str = "id, remote_url, sanitized_url, clone_path, tracking_kind, \
     tracking_value, last_synced_at, created_at, updated_at";

#[async_trait]
impl RepositoryStore for SqlStore {
    async fn create(
        &self,
        remote_url: &str,
        sanitized_url: &str,
        tracking: &TrackingConfig,
    ) -> DatabaseResult<Repository> {
        let op = DatabaseOperation::SaveRepository {
            url: sanitized_url.to_string(),
        };
        let now = format_ts(Utc::now());
        let (kind, value) = tracking.to_columns();

        let row = sqlx::query(&format!(
            "INSERT INTO repositories \
                 (remote_url, sanitized_url, tracking_kind, tracking_value, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {REPOSITORY_COLUMNS}"
        ))
        .bind(remote_url)
        .bind(sanitized_url)
        .bind(kind)
        .bind(value)
        .bind(&now)
        .bind(&now)
        .fetch_one(self.db.inner())
        .await
        .map_db_err(op)?;

        row_repository(&row)
    }

    async fn get(&self, id: i64) -> DatabaseResult<Option<Repository>> {
        let row = sqlx::query(&format!(
            "SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::GetRepository { id })?;

        row.map(|r| row_repository(&r)).transpose()
    }

    async fn get_by_url(&self, sanitized_url: &str) -> DatabaseResult<Option<Repository>> {
        let row = sqlx::query(&format!(
            "SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE sanitized_url = $1"
        ))
        .bind(sanitized_url)
        .fetch_optional(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("get_repository_by_url({sanitized_url})"),
        })?;

        row.map(|r| row_repository(&r)).transpose()
    }

    async fn all(&self) -> DatabaseResult<Vec<Repository>> {
        let rows = sqlx::query(&format!(
            "SELECT {REPOSITORY_COLUMNS} FROM repositories ORDER BY id"
        ))
        .fetch_all(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: "list_repositories".to_string(),
        })?;

        rows.iter().map(row_repository).collect()
    }

    async fn set_clone_path(&self, id: i64, clone_path: &str) -> DatabaseResult<()> {
        sqlx::query("UPDATE repositories SET clone_path = $1, updated_at = $2 WHERE id = $3")
            .bind(clone_path)
            .bind(format_ts(Utc::now()))
            .bind(id)
            .execute(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: format!("set_clone_path(id={id})"),
            })?;
        Ok(())
    }

    async fn set_last_synced(&self, id: i64, at: DateTime<Utc>) -> DatabaseResult<()> {
        sqlx::query("UPDATE repositories SET last_synced_at = $1, updated_at = $2 WHERE id = $3")
            .bind(format_ts(at))
            .bind(format_ts(Utc::now()))
            .bind(id)
            .execute(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: format!("set_last_synced(id={id})"),
            })?;
        Ok(())
    }

    async fn synced_before(&self, cutoff: DateTime<Utc>) -> DatabaseResult<Vec<Repository>> {
        let rows = sqlx::query(&format!(
            "SELECT {REPOSITORY_COLUMNS} FROM repositories \
             WHERE last_synced_at IS NULL OR last_synced_at < $1 \
             ORDER BY id"
        ))
        .bind(format_ts(cutoff))
        .fetch_all(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: "repositories_synced_before".to_string(),
        })?;

        rows.iter().map(row_repository).collect()
    }

    async fn delete(&self, id: i64) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM repositories WHERE id = $1")
            .bind(id)
            .execute(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: format!("delete_repository(id={id})"),
            })?;
        Ok(())
    }
}

#[async_trait]
impl CommitStore for SqlStore {
    async fn save_commit(&self, commit: &GitCommit) -> DatabaseResult<()> {
        sqlx::query(
            "INSERT INTO git_commits \
                 (repo_id, sha, parent_sha, author_name, author_email, message, committed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (repo_id, sha) DO UPDATE SET \
                 parent_sha = excluded.parent_sha, \
                 author_name = excluded.author_name, \
                 author_email = excluded.author_email, \
                 message = excluded.message, \
                 committed_at = excluded.committed_at",
        )
        .bind(commit.repo_id)
        .bind(&commit.sha)
        .bind(commit.parent_sha.as_deref())
        .bind(&commit.author_name)
        .bind(&commit.author_email)
        .bind(&commit.message)
        .bind(format_ts(commit.committed_at))
        .execute(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::SaveCommit {
            sha: commit.sha.clone(),
        })?;
        Ok(())
    }

    async fn get_commit(&self, repo_id: i64, sha: &str) -> DatabaseResult<Option<GitCommit>> {
        let row = sqlx::query(
            "SELECT repo_id, sha, parent_sha, author_name, author_email, message, committed_at \
             FROM git_commits WHERE repo_id = $1 AND sha = $2",
        )
        .bind(repo_id)
        .bind(sha)
        .fetch_optional(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("get_commit(sha={sha})"),
        })?;

        row.map(|r| row_commit(&r)).transpose()
    }

    async fn commits_for_repo(&self, repo_id: i64) -> DatabaseResult<Vec<GitCommit>> {
        let rows = sqlx::query(
            "SELECT repo_id, sha, parent_sha, author_name, author_email, message, committed_at \
             FROM git_commits WHERE repo_id = $1 ORDER BY committed_at",
        )
        .bind(repo_id)
        .fetch_all(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("commits_for_repo(repo={repo_id})"),
        })?;

        rows.iter().map(row_commit).collect()
    }

    async fn replace_branches(&self, repo_id: i64, branches: &[GitBranch]) -> DatabaseResult<()> {
        let op = DatabaseOperation::Query {
            description: format!("replace_branches(repo={repo_id}, count={})", branches.len()),
        };

        let mut tx = self.db.inner().begin().await.map_db_err(op.clone())?;

        sqlx::query("DELETE FROM git_branches WHERE repo_id = $1")
            .bind(repo_id)
            .execute(&mut *tx)
            .await
            .map_db_err(op.clone())?;

        for branch in branches {
            sqlx::query(
                "INSERT INTO git_branches (repo_id, name, head_sha, is_default) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(repo_id)
            .bind(&branch.name)
            .bind(&branch.head_sha)
            .bind(i64::from(branch.is_default))
            .execute(&mut *tx)
            .await
            .map_db_err(op.clone())?;
        }

        tx.commit().await.map_db_err(op)
    }

    async fn branches_for_repo(&self, repo_id: i64) -> DatabaseResult<Vec<GitBranch>> {
        let rows = sqlx::query(
            "SELECT repo_id, name, head_sha, is_default FROM git_branches \
             WHERE repo_id = $1 ORDER BY name",
        )
        .bind(repo_id)
        .fetch_all(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("branches_for_repo(repo={repo_id})"),
        })?;

        Ok(rows
            .iter()
            .map(|row| GitBranch {
                repo_id: row.get("repo_id"),
                name: row.get("name"),
                head_sha: row.get("head_sha"),
                is_default: row.get::<i64, _>("is_default") != 0,
            })
            .collect())
    }

    async fn replace_tags(&self, repo_id: i64, tags: &[GitTag]) -> DatabaseResult<()> {
        let op = DatabaseOperation::Query {
            description: format!("replace_tags(repo={repo_id}, count={})", tags.len()),
        };

        let mut tx = self.db.inner().begin().await.map_db_err(op.clone())?;

        sqlx::query("DELETE FROM git_tags WHERE repo_id = $1")
            .bind(repo_id)
            .execute(&mut *tx)
            .await
            .map_db_err(op.clone())?;

        for tag in tags {
            sqlx::query("INSERT INTO git_tags (repo_id, name, target_sha) VALUES ($1, $2, $3)")
                .bind(repo_id)
                .bind(&tag.name)
                .bind(&tag.target_sha)
                .execute(&mut *tx)
                .await
                .map_db_err(op.clone())?;
        }

        tx.commit().await.map_db_err(op)
    }

    async fn tags_for_repo(&self, repo_id: i64) -> DatabaseResult<Vec<GitTag>> {
        let rows = sqlx::query(
            "SELECT repo_id, name, target_sha FROM git_tags WHERE repo_id = $1 ORDER BY name",
        )
        .bind(repo_id)
        .fetch_all(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("tags_for_repo(repo={repo_id})"),
        })?;

        Ok(rows
            .iter()
            .map(|row| GitTag {
                repo_id: row.get("repo_id"),
                name: row.get("name"),
                target_sha: row.get("target_sha"),
            })
            .collect())
    }

    async fn save_files(&self, files: &[CommitFile]) -> DatabaseResult<()> {
        if files.is_empty() {
            return Ok(());
        }
        let op = DatabaseOperation::SaveFiles {
            commit_sha: files[0].commit_sha.clone(),
            count: files.len(),
        };

        let mut tx = self.db.inner().begin().await.map_db_err(op.clone())?;

        for file in files {
            sqlx::query(
                "INSERT INTO git_commit_files \
                     (repo_id, commit_sha, path, blob_sha, size, mime_type) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (commit_sha, blob_sha) DO NOTHING",
            )
            .bind(file.repo_id)
            .bind(&file.commit_sha)
            .bind(&file.path)
            .bind(&file.blob_sha)
            .bind(file.size)
            .bind(file.mime_type.as_deref())
            .execute(&mut *tx)
            .await
            .map_db_err(op.clone())?;
        }

        tx.commit().await.map_db_err(op)
    }

    async fn files_for_commit(&self, commit_sha: &str) -> DatabaseResult<Vec<CommitFile>> {
        let rows = sqlx::query(
            "SELECT repo_id, commit_sha, path, blob_sha, size, mime_type \
             FROM git_commit_files WHERE commit_sha = $1 ORDER BY path",
        )
        .bind(commit_sha)
        .fetch_all(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("files_for_commit(sha={commit_sha})"),
        })?;

        Ok(rows
            .iter()
            .map(|row| CommitFile {
                repo_id: row.get("repo_id"),
                commit_sha: row.get("commit_sha"),
                path: row.get("path"),
                blob_sha: row.get("blob_sha"),
                size: row.get("size"),
                mime_type: row.try_get("mime_type").unwrap_or(None),
            })
            .collect())
    }

    async fn delete_repo_data(&self, repo_id: i64) -> DatabaseResult<()> {
        let op = DatabaseOperation::Query {
            description: format!("delete_repo_data(repo={repo_id})"),
        };

        let mut tx = self.db.inner().begin().await.map_db_err(op.clone())?;

        for statement in [
            "DELETE FROM git_commit_files WHERE repo_id = $1",
            "DELETE FROM git_branches WHERE repo_id = $1",
            "DELETE FROM git_tags WHERE repo_id = $1",
            "DELETE FROM git_commits WHERE repo_id = $1",
        ] {
            sqlx::query(statement)
                .bind(repo_id)
                .execute(&mut *tx)
                .await
                .map_db_err(op.clone())?;
        }

        tx.commit().await.map_db_err(op)
    }
}

impl SqlStore {
    /// Attach file derivations to already-loaded snippets
    async fn load_derivations(&self, snippets: &mut [Snippet]) -> DatabaseResult<()> {
        if snippets.is_empty() {
            return Ok(());
        }

        let shas: Vec<&str> = snippets.iter().map(|s| s.sha.as_str()).collect();
        let sql = format!(
            "SELECT snippet_sha, file_path FROM snippet_file_derivations \
             WHERE snippet_sha IN ({}) ORDER BY file_path",
            placeholders(1, shas.len())
        );
        let mut query = sqlx::query(&sql);
        for sha in &shas {
            query = query.bind(*sha);
        }

        let rows = query
            .fetch_all(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: "load_derivations".to_string(),
            })?;

        let mut by_sha: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            by_sha
                .entry(row.get("snippet_sha"))
                .or_default()
                .push(row.get("file_path"));
        }
        for snippet in snippets {
            if let Some(paths) = by_sha.remove(&snippet.sha) {
                snippet.derives_from = paths;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SnippetStore for SqlStore {
    async fn save_snippets(
        &self,
        repo_id: i64,
        commit_sha: &str,
        snippets: &[Snippet],
    ) -> DatabaseResult<()> {
        if snippets.is_empty() {
            return Ok(());
        }
        let op = DatabaseOperation::SaveSnippets {
            commit_sha: commit_sha.to_string(),
            count: snippets.len(),
        };

        let mut tx = self.db.inner().begin().await.map_db_err(op.clone())?;

        for snippet in snippets {
            sqlx::query(
                "INSERT INTO snippets (sha, content, extension, created_at) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (sha) DO NOTHING",
            )
            .bind(&snippet.sha)
            .bind(&snippet.content)
            .bind(&snippet.extension)
            .bind(format_ts(snippet.created_at))
            .execute(&mut *tx)
            .await
            .map_db_err(op.clone())?;

            sqlx::query(
                "INSERT INTO snippet_commit_associations (snippet_sha, commit_sha, repo_id) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (snippet_sha, commit_sha) DO NOTHING",
            )
            .bind(&snippet.sha)
            .bind(commit_sha)
            .bind(repo_id)
            .execute(&mut *tx)
            .await
            .map_db_err(op.clone())?;

            for path in &snippet.derives_from {
                sqlx::query(
                    "INSERT INTO snippet_file_derivations (snippet_sha, file_path) \
                     VALUES ($1, $2) \
                     ON CONFLICT (snippet_sha, file_path) DO NOTHING",
                )
                .bind(&snippet.sha)
                .bind(path)
                .execute(&mut *tx)
                .await
                .map_db_err(op.clone())?;
            }
        }

        tx.commit().await.map_db_err(op)
    }

    async fn snippets_for_commit(&self, commit_sha: &str) -> DatabaseResult<Vec<Snippet>> {
        let rows = sqlx::query(
            "SELECT s.sha, s.content, s.extension, s.created_at \
             FROM snippets s \
             JOIN snippet_commit_associations a ON a.snippet_sha = s.sha \
             WHERE a.commit_sha = $1 ORDER BY s.sha",
        )
        .bind(commit_sha)
        .fetch_all(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("snippets_for_commit(sha={commit_sha})"),
        })?;

        let mut snippets: Vec<Snippet> =
            rows.iter().map(row_snippet).collect::<DatabaseResult<_>>()?;
        self.load_derivations(&mut snippets).await?;
        Ok(snippets)
    }

    async fn snippets_by_shas(&self, shas: &[String]) -> DatabaseResult<Vec<Snippet>> {
        if shas.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT sha, content, extension, created_at FROM snippets \
             WHERE sha IN ({}) ORDER BY sha",
            placeholders(1, shas.len())
        );
        let mut query = sqlx::query(&sql);
        for sha in shas {
            query = query.bind(sha);
        }

        let rows = query
            .fetch_all(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: format!("snippets_by_shas(count={})", shas.len()),
            })?;

        let mut snippets: Vec<Snippet> =
            rows.iter().map(row_snippet).collect::<DatabaseResult<_>>()?;
        self.load_derivations(&mut snippets).await?;
        Ok(snippets)
    }

    async fn has_snippets_for_commit(&self, commit_sha: &str) -> DatabaseResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM snippet_commit_associations WHERE commit_sha = $1",
        )
        .bind(commit_sha)
        .fetch_one(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("has_snippets_for_commit(sha={commit_sha})"),
        })?;

        Ok(row.get::<i64, _>("n") > 0)
    }

    async fn delete_associations_for_commit(&self, commit_sha: &str) -> DatabaseResult<u64> {
        let result = sqlx::query("DELETE FROM snippet_commit_associations WHERE commit_sha = $1")
            .bind(commit_sha)
            .execute(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: format!("delete_associations_for_commit(sha={commit_sha})"),
            })?;
        Ok(result.rows_affected())
    }

    async fn delete_orphaned_snippets(&self) -> DatabaseResult<u64> {
        let op = DatabaseOperation::Query {
            description: "delete_orphaned_snippets".to_string(),
        };

        let mut tx = self.db.inner().begin().await.map_db_err(op.clone())?;

        sqlx::query(
            "DELETE FROM snippet_file_derivations WHERE snippet_sha NOT IN \
                 (SELECT snippet_sha FROM snippet_commit_associations)",
        )
        .execute(&mut *tx)
        .await
        .map_db_err(op.clone())?;

        let result = sqlx::query(
            "DELETE FROM snippets WHERE sha NOT IN \
                 (SELECT snippet_sha FROM snippet_commit_associations)",
        )
        .execute(&mut *tx)
        .await
        .map_db_err(op.clone())?;

        tx.commit().await.map_db_err(op)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EnrichmentStore for SqlStore {
    async fn save_for_entity(
        &self,
        entity_type: EnrichmentEntityType,
        entity_id: &str,
        kind: EnrichmentType,
        subtype: Option<&str>,
        content: &str,
    ) -> DatabaseResult<i64> {
        let op = DatabaseOperation::SaveEnrichment {
            entity_id: entity_id.to_string(),
        };

        let mut tx = self.db.inner().begin().await.map_db_err(op.clone())?;

        let row = sqlx::query(
            "INSERT INTO enrichments_v2 (kind, subtype, content, created_at) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(kind.to_string())
        .bind(subtype)
        .bind(content)
        .bind(format_ts(Utc::now()))
        .fetch_one(&mut *tx)
        .await
        .map_db_err(op.clone())?;
        let enrichment_id: i64 = row.get("id");

        sqlx::query(
            "INSERT INTO enrichment_associations (enrichment_id, entity_type, entity_id) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (enrichment_id, entity_type, entity_id) DO NOTHING",
        )
        .bind(enrichment_id)
        .bind(entity_type.to_string())
        .bind(entity_id)
        .execute(&mut *tx)
        .await
        .map_db_err(op.clone())?;

        tx.commit().await.map_db_err(op)?;
        Ok(enrichment_id)
    }

    async fn for_entities(
        &self,
        entity_type: EnrichmentEntityType,
        entity_ids: &[String],
        kind: EnrichmentType,
    ) -> DatabaseResult<HashMap<String, Vec<Enrichment>>> {
        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT e.id, e.kind, e.subtype, e.content, e.created_at, a.entity_id \
             FROM enrichments_v2 e \
             JOIN enrichment_associations a ON a.enrichment_id = e.id \
             WHERE a.entity_type = $1 AND e.kind = $2 AND a.entity_id IN ({}) \
             ORDER BY e.id",
            placeholders(3, entity_ids.len())
        );
        let mut query = sqlx::query(&sql);
        query = query.bind(entity_type.to_string()).bind(kind.to_string());
        for id in entity_ids {
            query = query.bind(id);
        }

        let rows = query
            .fetch_all(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: format!("enrichments_for_entities(count={})", entity_ids.len()),
            })?;

        let mut by_entity: HashMap<String, Vec<Enrichment>> = HashMap::new();
        for row in rows {
            let kind_raw: String = row.get("kind");
            let kind = kind_raw.parse().map_err(|e: String| {
                DatabaseError::corrupt_row(
                    DatabaseOperation::Query {
                        description: "map_enrichment".to_string(),
                    },
                    e,
                )
            })?;
            by_entity
                .entry(row.get("entity_id"))
                .or_default()
                .push(Enrichment {
                    id: row.get("id"),
                    kind,
                    subtype: row.try_get("subtype").unwrap_or(None),
                    content: row.get("content"),
                    created_at: read_ts(&row, "created_at", "map_enrichment")?,
                });
        }
        Ok(by_entity)
    }

    async fn delete_for_entities(
        &self,
        entity_type: EnrichmentEntityType,
        entity_ids: &[String],
    ) -> DatabaseResult<u64> {
        if entity_ids.is_empty() {
            return Ok(0);
        }
        let op = DatabaseOperation::Query {
            description: format!("delete_enrichments(count={})", entity_ids.len()),
        };

        let mut tx = self.db.inner().begin().await.map_db_err(op.clone())?;

        let sql = format!(
            "DELETE FROM enrichment_associations \
             WHERE entity_type = $1 AND entity_id IN ({})",
            placeholders(2, entity_ids.len())
        );
        let mut query = sqlx::query(&sql);
        query = query.bind(entity_type.to_string());
        for id in entity_ids {
            query = query.bind(id);
        }
        let result = query.execute(&mut *tx).await.map_db_err(op.clone())?;

        sqlx::query(
            "DELETE FROM enrichments_v2 WHERE id NOT IN \
                 (SELECT enrichment_id FROM enrichment_associations)",
        )
        .execute(&mut *tx)
        .await
        .map_db_err(op.clone())?;

        tx.commit().await.map_db_err(op)?;
        Ok(result.rows_affected())
    }
}
