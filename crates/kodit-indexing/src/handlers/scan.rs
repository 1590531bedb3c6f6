//! Scan handler
//!
//! Walks the commit tree and records the commit row plus one file row
//! per blob, idempotent by `(commit_sha, blob_sha)`.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use kodit_data::models::{CommitFile, GitCommit, Task, TaskOperation};

use crate::error::{IndexingError, IndexingResult};
use crate::handlers::{require_commit_sha, HandlerContext, TaskHandler};
use crate::tracker::Tracker;

/// Rough mime type from a file extension; unknown extensions stay None
fn mime_for_extension(path: &str) -> Option<String> {
    let extension = path.rsplit('.').next()?;
    let mime = match extension {
        "go" => "text/x-go",
        "rs" => "text/x-rust",
        "py" | "pyi" => "text/x-python",
        "js" | "mjs" | "cjs" => "text/javascript",
        "ts" | "mts" | "cts" => "text/typescript",
        "md" => "text/markdown",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        _ => return None,
    };
    Some(mime.to_string())
}

pub struct ScanCommitHandler {
    ctx: Arc<HandlerContext>,
}

impl ScanCommitHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for ScanCommitHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::ScanCommit
    }

    async fn run(&self, task: &Task, tracker: Arc<Tracker>) -> IndexingResult<()> {
        let commit_sha = require_commit_sha(task)?;
        let repo = self.ctx.repository(task.payload.repository_id).await?;
        let Some(clone_path) = repo.clone_path.as_deref().map(PathBuf::from) else {
            return Err(IndexingError::validation(format!(
                "repository {} has no working copy to scan",
                repo.sanitized_url
            )));
        };

        let details = self.ctx.git.commit_details(&clone_path, commit_sha).await?;
        self.ctx
            .commits
            .save_commit(&GitCommit {
                repo_id: repo.id,
                sha: details.sha,
                parent_sha: details.parent_sha,
                author_name: details.author_name,
                author_email: details.author_email,
                message: details.message,
                committed_at: details.committed_at,
            })
            .await?;

        let entries = self.ctx.git.commit_files(&clone_path, commit_sha).await?;
        tracker.set_total(entries.len() as i64).await;

        let files: Vec<CommitFile> = entries
            .into_iter()
            .map(|entry| CommitFile {
                repo_id: repo.id,
                commit_sha: commit_sha.to_string(),
                mime_type: mime_for_extension(&entry.path),
                path: entry.path,
                blob_sha: entry.blob_sha,
                size: entry.size,
            })
            .collect();

        self.ctx.commits.save_files(&files).await?;
        tracker
            .set_current(files.len() as i64, format!("recorded {} files", files.len()))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_lookup() {
        assert_eq!(mime_for_extension("main.go").as_deref(), Some("text/x-go"));
        assert_eq!(mime_for_extension("lib.rs").as_deref(), Some("text/x-rust"));
        assert!(mime_for_extension("LICENSE").is_none());
        assert!(mime_for_extension("blob.bin").is_none());
    }
}
