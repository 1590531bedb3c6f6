//! Rescan handler
//!
//! The only code path that removes search-index rows for a live commit:
//! BM25 documents, both embedding tables, and the snippet associations
//! are dropped for the target commit, then the full scan chain is
//! re-enqueued so the commit is indexed from scratch.

use async_trait::async_trait;
use std::sync::Arc;

use kodit_data::models::{Task, TaskOperation};

use crate::error::IndexingResult;
use crate::handlers::{require_commit_sha, HandlerContext, TaskHandler};
use crate::operations::{PrescribedOperation, PRIORITY_INTERACTIVE};
use crate::tracker::Tracker;

pub struct RescanCommitHandler {
    ctx: Arc<HandlerContext>,
}

impl RescanCommitHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for RescanCommitHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::RescanCommit
    }

    async fn run(&self, task: &Task, tracker: Arc<Tracker>) -> IndexingResult<()> {
        let commit_sha = require_commit_sha(task)?;
        // Repository must still exist before we tear down its rows
        let repo = self.ctx.repository(task.payload.repository_id).await?;

        tracker.set_total(4).await;

        let bm25 = self.ctx.bm25.delete_for_commit(commit_sha).await?;
        tracker
            .set_current(1, format!("removed {bm25} keyword documents"))
            .await;

        let code = self.ctx.code_vectors.delete_for_commit(commit_sha).await?;
        tracker
            .set_current(2, format!("removed {code} code embeddings"))
            .await;

        let text = self.ctx.text_vectors.delete_for_commit(commit_sha).await?;
        tracker
            .set_current(3, format!("removed {text} text embeddings"))
            .await;

        let associations = self
            .ctx
            .snippets
            .delete_associations_for_commit(commit_sha)
            .await?;
        tracker
            .set_current(4, format!("removed {associations} snippet associations"))
            .await;

        self.ctx
            .queue
            .enqueue_operations(
                &PrescribedOperation::ScanAndIndexCommit.operations(),
                PRIORITY_INTERACTIVE,
                &task.payload,
            )
            .await?;

        tracing::info!(
            repository = %repo.sanitized_url,
            commit_sha,
            "commit cleaned, re-index chain enqueued"
        );
        Ok(())
    }
}
