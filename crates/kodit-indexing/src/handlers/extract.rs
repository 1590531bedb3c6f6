//! Extract handler
//!
//! Reads the files recorded for a commit out of the working copy, runs
//! the slicer, and saves content-addressed snippets with their commit
//! association. A commit that already has snippets skips entirely.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use kodit_data::models::{Snippet, Task, TaskOperation};
use kodit_slicer::SourceFile;

use crate::error::{IndexingError, IndexingResult};
use crate::handlers::{require_commit_sha, HandlerContext, TaskHandler};
use crate::tracker::Tracker;

pub struct ExtractSnippetsHandler {
    ctx: Arc<HandlerContext>,
}

impl ExtractSnippetsHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for ExtractSnippetsHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::ExtractSnippetsForCommit
    }

    async fn run(&self, task: &Task, tracker: Arc<Tracker>) -> IndexingResult<()> {
        let commit_sha = require_commit_sha(task)?;
        let repo = self.ctx.repository(task.payload.repository_id).await?;
        let Some(clone_path) = repo.clone_path.as_deref().map(PathBuf::from) else {
            return Err(IndexingError::validation(format!(
                "repository {} has no working copy",
                repo.sanitized_url
            )));
        };

        if self.ctx.snippets.has_snippets_for_commit(commit_sha).await? {
            tracker.skip("snippets already extracted for commit").await;
            return Ok(());
        }

        let files = self.ctx.commits.files_for_commit(commit_sha).await?;
        tracker.set_total(files.len() as i64).await;

        let mut sources = Vec::with_capacity(files.len());
        for (read, file) in files.iter().enumerate() {
            let bytes = match self
                .ctx
                .git
                .file_content(&clone_path, commit_sha, &file.path)
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %file.path, error = %e, "failed to read blob, skipping file");
                    continue;
                }
            };
            // Binary blobs have no snippets in them
            let Ok(content) = String::from_utf8(bytes) else {
                tracing::debug!(path = %file.path, "non-utf8 file skipped");
                continue;
            };
            sources.push(SourceFile {
                path: file.path.clone(),
                content,
            });
            tracker
                .set_current(read as i64 + 1, format!("read {}", file.path))
                .await;
        }

        let slicer = Arc::clone(&self.ctx.slicer);
        let assembled = tokio::task::spawn_blocking(move || slicer.slice(&sources))
            .await
            .map_err(|e| IndexingError::validation(format!("slicer task aborted: {e}")))?;

        if assembled.is_empty() {
            tracker.skip("no snippets extracted from commit").await;
            return Ok(());
        }

        let now = Utc::now();
        let snippets: Vec<Snippet> = assembled
            .into_iter()
            .map(|snippet| Snippet {
                sha: snippet.sha,
                content: snippet.content,
                extension: snippet.extension,
                derives_from: snippet.source_files,
                created_at: now,
            })
            .collect();

        self.ctx
            .snippets
            .save_snippets(repo.id, commit_sha, &snippets)
            .await?;
        tracker
            .set_current(
                files.len() as i64,
                format!("saved {} snippets", snippets.len()),
            )
            .await;
        Ok(())
    }
}
