//! Sync handler
//!
//! Fetches the remote, fast-forwards the working copy, refreshes the
//! branch and tag tables, and resolves the target commit from the
//! tracking config. Resolving a target enqueues the per-commit scan
//! chain; a repository with no branches is a recorded no-op.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use kodit_data::models::{GitBranch, GitTag, Task, TaskOperation, TaskPayload, TrackingConfig};

use crate::error::{IndexingError, IndexingResult};
use crate::handlers::{HandlerContext, TaskHandler};
use crate::operations::{PrescribedOperation, PRIORITY_INTERACTIVE};
use crate::tracker::Tracker;

pub struct SyncRepositoryHandler {
    ctx: Arc<HandlerContext>,
}

impl SyncRepositoryHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

/// Tracking config -> commit SHA, given the refreshed branch/tag tables
fn resolve_target_commit(
    tracking: &TrackingConfig,
    branches: &[GitBranch],
    tags: &[GitTag],
) -> Option<String> {
    match tracking {
        TrackingConfig::Branch(name) => branches
            .iter()
            .find(|b| &b.name == name)
            .map(|b| b.head_sha.clone()),
        TrackingConfig::Tag(name) => tags
            .iter()
            .find(|t| &t.name == name)
            .map(|t| t.target_sha.clone()),
        TrackingConfig::Commit(sha) => Some(sha.clone()),
        TrackingConfig::Default => branches
            .iter()
            .find(|b| b.is_default)
            .or_else(|| branches.first())
            .map(|b| b.head_sha.clone()),
    }
}

#[async_trait]
impl TaskHandler for SyncRepositoryHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::SyncRepository
    }

    async fn run(&self, task: &Task, tracker: Arc<Tracker>) -> IndexingResult<()> {
        let repo = self.ctx.repository(task.payload.repository_id).await?;
        let Some(clone_path) = repo.clone_path.as_deref().map(PathBuf::from) else {
            return Err(IndexingError::validation(format!(
                "repository {} has no working copy to sync",
                repo.sanitized_url
            )));
        };

        tracker.set_total(3).await;

        self.ctx.git.pull(&clone_path).await?;
        tracker.set_current(1, "fetched remote".to_string()).await;

        let branches: Vec<GitBranch> = self
            .ctx
            .git
            .all_branches(&clone_path)
            .await?
            .into_iter()
            .map(|b| GitBranch {
                repo_id: repo.id,
                name: b.name,
                head_sha: b.head_sha,
                is_default: b.is_default,
            })
            .collect();
        self.ctx.commits.replace_branches(repo.id, &branches).await?;

        let tags: Vec<GitTag> = self
            .ctx
            .git
            .all_tags(&clone_path)
            .await?
            .into_iter()
            .map(|t| GitTag {
                repo_id: repo.id,
                name: t.name,
                target_sha: t.target_sha,
            })
            .collect();
        self.ctx.commits.replace_tags(repo.id, &tags).await?;
        tracker
            .set_current(2, format!("recorded {} branches", branches.len()))
            .await;

        self.ctx
            .repositories
            .set_last_synced(repo.id, Utc::now())
            .await?;

        let Some(target) = resolve_target_commit(&repo.tracking, &branches, &tags) else {
            tracker.skip("no branches to index").await;
            return Ok(());
        };

        self.ctx
            .queue
            .enqueue_operations(
                &PrescribedOperation::ScanAndIndexCommit.operations(),
                PRIORITY_INTERACTIVE,
                &TaskPayload::for_commit(repo.id, target.clone()),
            )
            .await?;
        tracker
            .set_current(3, format!("target commit {target}"))
            .await;
        Ok(())
    }
}
