//! Application wiring
//!
//! Builds the shared handler context out of configuration: connection
//! pool, migrations, SQL stores, git adapter, slicer, and the two
//! OpenAI-compatible providers.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use kodit_config::AppConfig;
use kodit_data::{DbPool, RetryPolicy, SqlStore, SqlTaskQueue, SqlTaskStatusStore};
use kodit_git::Git2Adapter;
use kodit_indexing::{HandlerContext, HandlerRegistry, RepositoryService, WorkerPool};
use kodit_providers::{OpenAiEmbedder, OpenAiTextGenerator};
use kodit_search::{Bm25Store, VectorKind, VectorStore};
use kodit_slicer::{Slicer, SlicerPolicy};

/// Build the full handler context from configuration
///
/// Creates the data and clone directories, connects the pool, and runs
/// pending migrations.
pub async fn build_context(config: AppConfig) -> Result<Arc<HandlerContext>> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    std::fs::create_dir_all(&config.clone_dir)
        .with_context(|| format!("creating clone dir {}", config.clone_dir.display()))?;

    let db = DbPool::initialize(&config.db_url, config.db_max_connections)
        .await
        .context("initialising database")?;
    tracing::info!(dialect = %db.dialect(), "database ready");

    let store = SqlStore::new(db.clone());
    let queue = SqlTaskQueue::new(
        db.clone(),
        RetryPolicy {
            max_retries: config.worker.max_retries,
            initial: Duration::from_secs(config.worker.retry_initial_secs),
            backoff: config.worker.retry_backoff,
        },
    );
    let statuses = SqlTaskStatusStore::new(db.clone());

    let embedder =
        OpenAiEmbedder::new(&config.embedding_endpoint).context("building embedding client")?;
    let text_generator = OpenAiTextGenerator::new(&config.enrichment_endpoint)
        .context("building enrichment client")?;

    Ok(Arc::new(HandlerContext {
        repositories: Arc::new(store.clone()),
        commits: Arc::new(store.clone()),
        snippets: Arc::new(store.clone()),
        enrichments: Arc::new(store),
        queue: Arc::new(queue),
        statuses: Arc::new(statuses),
        git: Arc::new(Git2Adapter::new()),
        slicer: Arc::new(Slicer::new(SlicerPolicy::default())),
        embedder: Arc::new(embedder),
        text_generator: Arc::new(text_generator),
        bm25: Bm25Store::new(db.clone()),
        code_vectors: VectorStore::new(db.clone(), VectorKind::Code),
        text_vectors: VectorStore::new(db, VectorKind::Text),
        config,
    }))
}

/// Start the worker pool against the context's queue
pub async fn start_workers(
    ctx: &Arc<HandlerContext>,
    token: CancellationToken,
) -> Result<WorkerPool> {
    let pool = WorkerPool::start(
        ctx.config.worker.count,
        Arc::clone(&ctx.queue),
        HandlerRegistry::new(Arc::clone(ctx)),
        Arc::clone(&ctx.statuses),
        Vec::new(),
        ctx.config.worker.poll_period(),
        token,
    )
    .await
    .context("starting worker pool")?;

    tracing::info!(workers = ctx.config.worker.count, "worker pool started");
    Ok(pool)
}

/// Build the user-facing service over a shared context
pub fn service(ctx: &Arc<HandlerContext>) -> RepositoryService {
    RepositoryService::new(Arc::clone(ctx))
}
