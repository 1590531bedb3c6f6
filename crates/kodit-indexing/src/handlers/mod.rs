//! Task handlers
//!
//! One handler per operation kind, registered in a map the worker
//! consults at dispatch time. Handlers are idempotent: re-running one
//! after a partial completion converges through content addressing and
//! natural keys, and every "already done" path records a skip.

mod bm25_index;
mod clone;
mod delete;
mod embeddings;
mod enrich;
mod extract;
mod rescan;
mod scan;
mod sync;

pub use bm25_index::Bm25IndexHandler;
pub use clone::CloneRepositoryHandler;
pub use delete::DeleteRepositoryHandler;
pub use embeddings::{CodeEmbeddingsHandler, TextEmbeddingsHandler};
pub use enrich::EnrichCommitHandler;
pub use extract::ExtractSnippetsHandler;
pub use rescan::RescanCommitHandler;
pub use scan::ScanCommitHandler;
pub use sync::SyncRepositoryHandler;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use kodit_config::AppConfig;
use kodit_data::models::{Repository, Task, TaskOperation};
use kodit_data::traits::{
    CommitStore, EnrichmentStore, RepositoryStore, SnippetStore, TaskQueue, TaskStatusStore,
};
use kodit_git::GitAdapter;
use kodit_providers::{Embedder, TextGenerator};
use kodit_search::{Bm25Store, VectorStore};
use kodit_slicer::Slicer;

use crate::error::{IndexingError, IndexingResult};
use crate::tracker::Tracker;

/// Everything a handler can reach: stores, adapters, providers
pub struct HandlerContext {
    pub config: AppConfig,
    pub repositories: Arc<dyn RepositoryStore>,
    pub commits: Arc<dyn CommitStore>,
    pub snippets: Arc<dyn SnippetStore>,
    pub enrichments: Arc<dyn EnrichmentStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub statuses: Arc<dyn TaskStatusStore>,
    pub git: Arc<dyn GitAdapter>,
    pub slicer: Arc<Slicer>,
    pub embedder: Arc<dyn Embedder>,
    pub text_generator: Arc<dyn TextGenerator>,
    pub bm25: Bm25Store,
    pub code_vectors: VectorStore,
    pub text_vectors: VectorStore,
}

impl HandlerContext {
    /// Load the task's repository or fail with not-found
    pub async fn repository(&self, repository_id: i64) -> IndexingResult<Repository> {
        self.repositories
            .get(repository_id)
            .await?
            .ok_or_else(|| IndexingError::not_found("repository", repository_id))
    }
}

/// Commit SHA the task payload must carry for per-commit operations
pub fn require_commit_sha(task: &Task) -> IndexingResult<&str> {
    task.payload
        .commit_sha
        .as_deref()
        .ok_or(IndexingError::MissingPayload("commit_sha"))
}

/// One idempotent unit of pipeline work
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn operation(&self) -> TaskOperation;

    async fn run(&self, task: &Task, tracker: Arc<Tracker>) -> IndexingResult<()>;
}

/// Operation-kind to handler dispatch table
pub struct HandlerRegistry {
    handlers: HashMap<TaskOperation, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Register the full production handler set
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        let handlers: Vec<Arc<dyn TaskHandler>> = vec![
            Arc::new(CloneRepositoryHandler::new(Arc::clone(&ctx))),
            Arc::new(SyncRepositoryHandler::new(Arc::clone(&ctx))),
            Arc::new(ScanCommitHandler::new(Arc::clone(&ctx))),
            Arc::new(ExtractSnippetsHandler::new(Arc::clone(&ctx))),
            Arc::new(Bm25IndexHandler::new(Arc::clone(&ctx))),
            Arc::new(CodeEmbeddingsHandler::new(Arc::clone(&ctx))),
            Arc::new(TextEmbeddingsHandler::new(Arc::clone(&ctx))),
            Arc::new(EnrichCommitHandler::new(Arc::clone(&ctx))),
            Arc::new(RescanCommitHandler::new(Arc::clone(&ctx))),
            Arc::new(DeleteRepositoryHandler::new(ctx)),
        ];

        Self {
            handlers: handlers
                .into_iter()
                .map(|handler| (handler.operation(), handler))
                .collect(),
        }
    }

    pub fn get(&self, operation: TaskOperation) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&operation).cloned()
    }
}
