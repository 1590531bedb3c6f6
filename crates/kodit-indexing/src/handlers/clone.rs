//! Clone handler
//!
//! Clones the remote into `{clone_dir}/{sanitised-url}` and records the
//! path. A repository that already has a working copy skips the clone
//! but still enqueues the sync, so a replay after a crash between clone
//! and enqueue converges.

use async_trait::async_trait;
use std::sync::Arc;

use kodit_data::models::{Task, TaskOperation};

use crate::error::IndexingResult;
use crate::handlers::{HandlerContext, TaskHandler};
use crate::operations::{PrescribedOperation, PRIORITY_INTERACTIVE};
use crate::tracker::Tracker;

pub struct CloneRepositoryHandler {
    ctx: Arc<HandlerContext>,
}

impl CloneRepositoryHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    async fn enqueue_sync(&self, task: &Task) -> IndexingResult<()> {
        self.ctx
            .queue
            .enqueue_operations(
                &PrescribedOperation::SyncRepository.operations(),
                PRIORITY_INTERACTIVE,
                &task.payload,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for CloneRepositoryHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::CloneRepository
    }

    async fn run(&self, task: &Task, tracker: Arc<Tracker>) -> IndexingResult<()> {
        let repo = self.ctx.repository(task.payload.repository_id).await?;

        if let Some(path) = &repo.clone_path
            && std::path::Path::new(path).exists()
        {
            tracker.skip("working copy already present").await;
            return self.enqueue_sync(task).await;
        }

        let clone_path = self.ctx.config.clone_dir.join(&repo.sanitized_url);
        tracker.set_total(1).await;

        self.ctx
            .git
            .clone_repository(&repo.remote_url, &clone_path)
            .await?;
        self.ctx
            .repositories
            .set_clone_path(repo.id, &clone_path.to_string_lossy())
            .await?;

        tracker
            .set_current(1, format!("cloned to {}", clone_path.display()))
            .await;
        self.enqueue_sync(task).await
    }
}
