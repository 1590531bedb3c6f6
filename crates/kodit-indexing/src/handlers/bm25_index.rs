//! BM25 index handler
//!
//! Builds `(snippet_sha, content)` documents for the commit's snippets
//! and hands them to the keyword store. No snippets, no work: skip.

use async_trait::async_trait;
use std::sync::Arc;

use kodit_data::models::{Task, TaskOperation};

use crate::error::IndexingResult;
use crate::handlers::{require_commit_sha, HandlerContext, TaskHandler};
use crate::tracker::Tracker;

pub struct Bm25IndexHandler {
    ctx: Arc<HandlerContext>,
}

impl Bm25IndexHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for Bm25IndexHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::CreateBm25IndexForCommit
    }

    async fn run(&self, task: &Task, tracker: Arc<Tracker>) -> IndexingResult<()> {
        let commit_sha = require_commit_sha(task)?;

        let snippets = self.ctx.snippets.snippets_for_commit(commit_sha).await?;
        if snippets.is_empty() {
            tracker.skip("no snippets to index").await;
            return Ok(());
        }

        let documents: Vec<(String, String)> = snippets
            .into_iter()
            .map(|s| (s.sha, s.content))
            .collect();

        tracker.set_total(documents.len() as i64).await;
        self.ctx.bm25.index(commit_sha, &documents).await?;
        tracker
            .set_current(
                documents.len() as i64,
                format!("indexed {} documents", documents.len()),
            )
            .await;
        Ok(())
    }
}
