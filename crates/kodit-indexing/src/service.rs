//! Repository service
//!
//! Translates user intents into prescribed-operation chains on the
//! queue, and answers queries (status, hybrid search) from the stores.
//! This is the only surface the CLI and any outer transport talk to.

use chrono::Utc;
use std::sync::Arc;

use kodit_data::models::{
    Repository, RepositoryStatusSummary, Snippet, TaskPayload, TrackingConfig,
};
use kodit_data::traits::TaskFilter;
use kodit_git::sanitize_remote_url;
use kodit_search::reciprocal_rank_fusion;

use crate::error::{IndexingError, IndexingResult};
use crate::handlers::HandlerContext;
use crate::operations::{PrescribedOperation, PRIORITY_INTERACTIVE};
use crate::status::summarize_repository_status;

/// One hybrid search result
#[derive(Debug, Clone)]
pub struct SnippetSearchResult {
    pub snippet: Snippet,
    pub score: f64,
}

pub struct RepositoryService {
    ctx: Arc<HandlerContext>,
}

impl RepositoryService {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    /// Register a repository and enqueue its indexing chain
    ///
    /// # Errors
    ///
    /// Returns a validation error when the sanitised URL already exists.
    pub async fn add_repository(
        &self,
        remote_url: &str,
        tracking: TrackingConfig,
    ) -> IndexingResult<Repository> {
        let sanitized = sanitize_remote_url(remote_url);
        if sanitized.is_empty() {
            return Err(IndexingError::validation(format!(
                "not a usable remote URL: {remote_url}"
            )));
        }

        if self.ctx.repositories.get_by_url(&sanitized).await?.is_some() {
            return Err(IndexingError::validation(format!(
                "repository already exists: {sanitized}"
            )));
        }

        let repo = self
            .ctx
            .repositories
            .create(remote_url, &sanitized, &tracking)
            .await?;

        self.ctx
            .queue
            .enqueue_operations(
                &PrescribedOperation::CreateNewRepository.operations(),
                PRIORITY_INTERACTIVE,
                &TaskPayload::for_repository(repo.id),
            )
            .await?;

        tracing::info!(repository = %repo.sanitized_url, id = repo.id, "repository registered");
        Ok(repo)
    }

    /// Enqueue a re-sync of an existing repository
    pub async fn sync(&self, repository_id: i64) -> IndexingResult<()> {
        let repo = self.ctx.repository(repository_id).await?;
        self.ctx
            .queue
            .enqueue_operations(
                &PrescribedOperation::SyncRepository.operations(),
                PRIORITY_INTERACTIVE,
                &TaskPayload::for_repository(repo.id),
            )
            .await?;
        Ok(())
    }

    /// Enqueue a clean re-index of one commit
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed SHA and not-found when
    /// the commit was never scanned for this repository.
    pub async fn rescan(&self, repository_id: i64, commit_sha: &str) -> IndexingResult<()> {
        if commit_sha.len() != 40 || !commit_sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IndexingError::validation(format!(
                "not a commit SHA: {commit_sha}"
            )));
        }

        let repo = self.ctx.repository(repository_id).await?;
        if self
            .ctx
            .commits
            .get_commit(repo.id, commit_sha)
            .await?
            .is_none()
        {
            return Err(IndexingError::not_found("commit", commit_sha));
        }

        self.ctx
            .queue
            .enqueue_operations(
                &PrescribedOperation::RescanCommit.operations(),
                PRIORITY_INTERACTIVE,
                &TaskPayload::for_commit(repo.id, commit_sha.to_string()),
            )
            .await?;
        Ok(())
    }

    /// Enqueue a cascading delete
    pub async fn delete(&self, repository_id: i64) -> IndexingResult<()> {
        let repo = self.ctx.repository(repository_id).await?;
        self.ctx
            .queue
            .enqueue_operations(
                &PrescribedOperation::DeleteRepository.operations(),
                PRIORITY_INTERACTIVE,
                &TaskPayload::for_repository(repo.id),
            )
            .await?;
        Ok(())
    }

    /// Hybrid search: BM25 plus both vector corpora, fused by
    /// reciprocal rank
    ///
    /// A failing embedder degrades to keyword-only search with a
    /// warning instead of failing the query.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> IndexingResult<Vec<SnippetSearchResult>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut lists = Vec::with_capacity(3);
        lists.push(self.ctx.bm25.search(query, limit, None).await?);

        match self.ctx.embedder.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => {
                let query_vector = vectors.remove(0);
                lists.push(self.ctx.code_vectors.search(&query_vector, limit, None).await?);
                lists.push(self.ctx.text_vectors.search(&query_vector, limit, None).await?);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed; keyword-only results");
            }
        }

        let fused = reciprocal_rank_fusion(&lists, limit);
        if fused.is_empty() {
            return Ok(Vec::new());
        }

        let shas: Vec<String> = fused.iter().map(|hit| hit.snippet_sha.clone()).collect();
        let snippets = self.ctx.snippets.snippets_by_shas(&shas).await?;

        Ok(fused
            .into_iter()
            .filter_map(|hit| {
                snippets
                    .iter()
                    .find(|s| s.sha == hit.snippet_sha)
                    .map(|snippet| SnippetSearchResult {
                        snippet: snippet.clone(),
                        score: hit.score,
                    })
            })
            .collect())
    }

    /// Derived user-visible status of one repository
    pub async fn status(&self, repository_id: i64) -> IndexingResult<RepositoryStatusSummary> {
        let repo = self.ctx.repository(repository_id).await?;
        let statuses = self
            .ctx
            .statuses
            .statuses_for(kodit_data::models::TrackableType::Repository, repo.id)
            .await?;
        let pending = self.ctx.queue.pending_count(repo.id).await?;
        Ok(summarize_repository_status(&statuses, pending, Utc::now()))
    }

    pub async fn list_repositories(&self) -> IndexingResult<Vec<Repository>> {
        Ok(self.ctx.repositories.all().await?)
    }

    /// True when the queue holds no pending or in-flight work
    pub async fn queue_drained(&self) -> IndexingResult<bool> {
        let open = self
            .ctx
            .queue
            .list(&TaskFilter {
                state: Some(kodit_data::models::TaskState::Pending),
                ..TaskFilter::default()
            })
            .await?
            .len()
            + self
                .ctx
                .queue
                .list(&TaskFilter {
                    state: Some(kodit_data::models::TaskState::Started),
                    ..TaskFilter::default()
                })
                .await?
                .len();
        Ok(open == 0)
    }

    /// Startup check: one tiny round-trip against both providers
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the failing endpoint; skipped
    /// entirely when `skip_provider_validation` is set.
    pub async fn validate_providers(&self) -> IndexingResult<()> {
        if self.ctx.config.skip_provider_validation {
            tracing::debug!("provider validation skipped by configuration");
            return Ok(());
        }

        self.ctx.embedder.validate().await.map_err(|e| {
            IndexingError::validation(format!("embedding endpoint check failed: {e}"))
        })?;
        self.ctx.text_generator.validate().await.map_err(|e| {
            IndexingError::validation(format!("enrichment endpoint check failed: {e}"))
        })?;
        Ok(())
    }
}
