//! Embedding handlers
//!
//! Both handlers drive the shared batcher; they differ only in which
//! vector store they target and what text they embed. Code embeddings
//! take snippet content; text embeddings take the summary enrichment
//! written by the enrich handler earlier in the chain.

use async_trait::async_trait;
use std::sync::Arc;

use kodit_data::models::{EnrichmentEntityType, EnrichmentType, Task, TaskOperation};
use kodit_search::{Document, IndexOptions, VectorIndexer, VectorStore};

use crate::error::IndexingResult;
use crate::handlers::{require_commit_sha, HandlerContext, TaskHandler};
use crate::tracker::Tracker;

/// Tolerated failed-batch fraction before the task itself fails
const MAX_FAILURE_RATE: f64 = 0.5;

fn indexer_for(ctx: &HandlerContext, store: VectorStore) -> VectorIndexer {
    VectorIndexer::new(
        Arc::clone(&ctx.embedder),
        store,
        ctx.config.embedding_endpoint.num_parallel_tasks,
    )
}

/// Progress callback bridging the sync batcher into the async tracker
fn progress_into(tracker: &Arc<Tracker>) -> IndexOptions {
    let progress_tracker = Arc::clone(tracker);
    IndexOptions {
        on_progress: Some(Box::new(move |done, total| {
            let tracker = Arc::clone(&progress_tracker);
            tokio::spawn(async move {
                tracker.set_total(total as i64).await;
                tracker.set_current(done as i64, None).await;
            });
        })),
        on_batch_error: Some(Box::new(|start, end, error| {
            tracing::warn!(
                start,
                end,
                error = %error,
                "embedding batch failed; siblings continue"
            );
        })),
        max_failure_rate: MAX_FAILURE_RATE,
    }
}

pub struct CodeEmbeddingsHandler {
    ctx: Arc<HandlerContext>,
}

impl CodeEmbeddingsHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for CodeEmbeddingsHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::CreateCodeEmbeddingsForCommit
    }

    async fn run(&self, task: &Task, tracker: Arc<Tracker>) -> IndexingResult<()> {
        let commit_sha = require_commit_sha(task)?;

        let snippets = self.ctx.snippets.snippets_for_commit(commit_sha).await?;
        if snippets.is_empty() {
            tracker.skip("no snippets to embed").await;
            return Ok(());
        }

        let documents: Vec<Document> = snippets
            .into_iter()
            .map(|s| Document {
                snippet_id: s.sha,
                text: s.content,
            })
            .collect();

        let indexer = indexer_for(&self.ctx, self.ctx.code_vectors.clone());
        indexer
            .index(commit_sha, documents, progress_into(&tracker))
            .await?;
        Ok(())
    }
}

pub struct TextEmbeddingsHandler {
    ctx: Arc<HandlerContext>,
}

impl TextEmbeddingsHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandler for TextEmbeddingsHandler {
    fn operation(&self) -> TaskOperation {
        TaskOperation::CreateTextEmbeddingsForCommit
    }

    async fn run(&self, task: &Task, tracker: Arc<Tracker>) -> IndexingResult<()> {
        let commit_sha = require_commit_sha(task)?;

        let snippets = self.ctx.snippets.snippets_for_commit(commit_sha).await?;
        if snippets.is_empty() {
            tracker.skip("no snippets for commit").await;
            return Ok(());
        }

        let shas: Vec<String> = snippets.iter().map(|s| s.sha.clone()).collect();
        let summaries = self
            .ctx
            .enrichments
            .for_entities(EnrichmentEntityType::Snippet, &shas, EnrichmentType::Summary)
            .await?;

        let documents: Vec<Document> = summaries
            .into_iter()
            .filter_map(|(sha, mut enrichments)| {
                enrichments.pop().map(|e| Document {
                    snippet_id: sha,
                    text: e.content,
                })
            })
            .collect();

        if documents.is_empty() {
            tracker.skip("no summaries to embed yet").await;
            return Ok(());
        }

        let indexer = indexer_for(&self.ctx, self.ctx.text_vectors.clone());
        indexer
            .index(commit_sha, documents, progress_into(&tracker))
            .await?;
        Ok(())
    }
}
