//! Delete handler
//!
//! Cascading removal: per-commit search rows and associations, then the
//! commit/branch/tag/file tables, orphaned snippets and their
//! enrichments, the working copy directory, the status history, and
//! finally the repository row. A repository that is already gone skips.

use async_trait::async_trait;
use std::sync::Arc;

use kodit_data::models::{EnrichmentEntityType, Task, TaskOperation, TrackableType};

use crate::error::IndexingResult;
use crate::handlers::{HandlerContext, TaskHandler};
use crate::tracker::Tracker;

pub struct DeleteRepositoryHandler {
    ctx: Arc<HandlerContext>,
}

impl DeleteRepositoryHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for DeleteRepositoryHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::DeleteRepository
    }

    async fn run(&self, task: &Task, tracker: Arc<Tracker>) -> IndexingResult<()> {
        let repository_id = task.payload.repository_id;
        let Some(repo) = self.ctx.repositories.get(repository_id).await? else {
            tracker.skip("repository already deleted").await;
            return Ok(());
        };

        let commits = self.ctx.commits.commits_for_repo(repository_id).await?;
        tracker.set_total(commits.len() as i64 + 1).await;

        // Snippets that may orphan once this repository's associations go
        let mut candidate_shas: Vec<String> = Vec::new();

        for (done, commit) in commits.iter().enumerate() {
            let snippets = self.ctx.snippets.snippets_for_commit(&commit.sha).await?;
            candidate_shas.extend(snippets.into_iter().map(|s| s.sha));

            self.ctx.bm25.delete_for_commit(&commit.sha).await?;
            self.ctx.code_vectors.delete_for_commit(&commit.sha).await?;
            self.ctx.text_vectors.delete_for_commit(&commit.sha).await?;
            self.ctx
                .snippets
                .delete_associations_for_commit(&commit.sha)
                .await?;

            tracker
                .set_current(done as i64 + 1, format!("cleaned commit {}", commit.sha))
                .await;
        }

        self.ctx.commits.delete_repo_data(repository_id).await?;
        self.ctx.snippets.delete_orphaned_snippets().await?;

        // Enrichments of snippets that no longer exist anywhere
        candidate_shas.sort();
        candidate_shas.dedup();
        if !candidate_shas.is_empty() {
            let survivors = self.ctx.snippets.snippets_by_shas(&candidate_shas).await?;
            let surviving: std::collections::HashSet<&str> =
                survivors.iter().map(|s| s.sha.as_str()).collect();
            let orphaned: Vec<String> = candidate_shas
                .into_iter()
                .filter(|sha| !surviving.contains(sha.as_str()))
                .collect();
            if !orphaned.is_empty() {
                self.ctx
                    .enrichments
                    .delete_for_entities(EnrichmentEntityType::Snippet, &orphaned)
                    .await?;
            }
        }

        if let Some(path) = &repo.clone_path {
            match tokio::fs::remove_dir_all(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "failed to remove working copy");
                }
            }
        }

        // Clear queue leftovers and status history before the row goes
        self.ctx.queue.delete_for_repository(repository_id).await?;
        self.ctx
            .statuses
            .delete_for(TrackableType::Repository, repository_id)
            .await?;
        self.ctx.repositories.delete(repository_id).await?;

        tracker
            .set_current(
                commits.len() as i64 + 1,
                format!("deleted repository {}", repo.sanitized_url),
            )
            .await;
        Ok(())
    }
}
