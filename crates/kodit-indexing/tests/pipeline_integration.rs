//! End-to-end pipeline tests
//!
//! Real worker pool, real SQLite stores, real git fixtures; only the
//! two providers are mocks. Each test drives a user intent through the
//! queue and waits for quiescence before asserting on the tables.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use kodit_config::AppConfig;
use kodit_data::models::{TaskState, TrackingConfig};
use kodit_data::traits::{
    CommitStore, RepositoryStore, SnippetStore, TaskFilter, TaskQueue as _,
};
use kodit_data::{DbPool, RetryPolicy, SqlStore, SqlTaskQueue, SqlTaskStatusStore};
use kodit_git::Git2Adapter;
use kodit_indexing::{
    HandlerContext, HandlerRegistry, RepositoryService, WorkerPool,
};
use kodit_providers::{MockEmbedder, MockTextGenerator};
use kodit_search::{Bm25Store, VectorKind, VectorStore};
use kodit_slicer::{Slicer, SlicerPolicy};

const GO_FIXTURE: &str = r#"package mathutil

// Add returns the sum of two integers.
func Add(a, b int) int {
	return clamp(a + b)
}

// Multiply returns the product of two integers.
func Multiply(a, b int) int {
	return clamp(a * b)
}

func clamp(v int) int {
	return v
}
"#;

struct Harness {
    service: RepositoryService,
    pool: WorkerPool,
    store: SqlStore,
    queue: SqlTaskQueue,
    bm25: Bm25Store,
    code_vectors: VectorStore,
    text_vectors: VectorStore,
    _data_dir: TempDir,
}

/// Local git repository with one commit of the given files
fn fixture_repo(files: &[(&str, &str)]) -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let repo = git2::Repository::init(dir.path()).unwrap();
    let signature = git2::Signature::now("Fixture", "fixture@example.com").unwrap();

    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    let mut index = repo.index().unwrap();
    index
        .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let commit = repo
        .commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])
        .unwrap();

    (dir, commit.to_string())
}

async fn harness() -> Harness {
    let data_dir = TempDir::new().unwrap();
    let config = AppConfig::for_tests(data_dir.path().to_path_buf());

    let db = DbPool::initialize("sqlite::memory:", 1).await.unwrap();
    let store = SqlStore::new(db.clone());
    let queue = SqlTaskQueue::new(
        db.clone(),
        RetryPolicy {
            max_retries: 3,
            initial: Duration::ZERO,
            backoff: 2.0,
        },
    );
    let statuses = SqlTaskStatusStore::new(db.clone());
    let bm25 = Bm25Store::new(db.clone());
    let code_vectors = VectorStore::new(db.clone(), VectorKind::Code);
    let text_vectors = VectorStore::new(db, VectorKind::Text);

    let ctx = Arc::new(HandlerContext {
        config: config.clone(),
        repositories: Arc::new(store.clone()),
        commits: Arc::new(store.clone()),
        snippets: Arc::new(store.clone()),
        enrichments: Arc::new(store.clone()),
        queue: Arc::new(queue.clone()),
        statuses: Arc::new(statuses.clone()),
        git: Arc::new(Git2Adapter::new()),
        slicer: Arc::new(Slicer::new(SlicerPolicy::default())),
        embedder: Arc::new(MockEmbedder::new(8)),
        text_generator: Arc::new(MockTextGenerator::new()),
        bm25: bm25.clone(),
        code_vectors: code_vectors.clone(),
        text_vectors: text_vectors.clone(),
    });

    let pool = WorkerPool::start(
        2,
        Arc::new(queue.clone()),
        HandlerRegistry::new(Arc::clone(&ctx)),
        Arc::new(statuses),
        Vec::new(),
        Duration::from_millis(20),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    Harness {
        service: RepositoryService::new(ctx),
        pool,
        store,
        queue,
        bm25,
        code_vectors,
        text_vectors,
        _data_dir: data_dir,
    }
}

/// Block until the queue is drained and every worker is idle
async fn wait_for_quiescence(h: &Harness) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let mut settled = 0;

    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "pipeline did not quiesce within 30s"
        );

        let drained = h.service.queue_drained().await.unwrap();
        if drained && h.pool.idle() {
            // Two consecutive observations close the gap between a task
            // delete and the worker flipping its idle flag
            settled += 1;
            if settled >= 2 {
                return;
            }
        } else {
            settled = 0;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
struct Counts {
    commits: usize,
    snippets: usize,
    bm25: i64,
    code_vectors: i64,
    text_vectors: i64,
}

async fn counts(h: &Harness, repo_id: i64, commit_sha: &str) -> Counts {
    Counts {
        commits: h.store.commits_for_repo(repo_id).await.unwrap().len(),
        snippets: h.store.snippets_for_commit(commit_sha).await.unwrap().len(),
        bm25: h.bm25.count_for_commit(commit_sha).await.unwrap(),
        code_vectors: h.code_vectors.count_for_commit(commit_sha).await.unwrap(),
        text_vectors: h.text_vectors.count_for_commit(commit_sha).await.unwrap(),
    }
}

#[tokio::test]
async fn test_add_repository_indexes_to_quiescence() {
    let (origin, commit_sha) = fixture_repo(&[("mathutil/math.go", GO_FIXTURE)]);
    let h = harness().await;

    let repo = h
        .service
        .add_repository(origin.path().to_str().unwrap(), TrackingConfig::Default)
        .await
        .unwrap();
    wait_for_quiescence(&h).await;

    let repos = h.service.list_repositories().await.unwrap();
    assert_eq!(repos.len(), 1);
    assert!(repos[0].clone_path.is_some(), "clone recorded a working copy");

    let c = counts(&h, repo.id, &commit_sha).await;
    assert_eq!(c.commits, 1);
    assert!(c.snippets >= 2, "two public functions: {c:?}");
    assert!(c.bm25 > 0);
    assert!(c.code_vectors > 0);
    assert!(c.text_vectors > 0, "summaries were embedded: {c:?}");

    // Every snippet is content-addressed by its own SHA-256
    use sha2::{Digest, Sha256};
    for snippet in h.store.snippets_for_commit(&commit_sha).await.unwrap() {
        let expected = format!("{:x}", Sha256::digest(snippet.content.as_bytes()));
        assert_eq!(snippet.sha, expected);
    }

    h.pool.shutdown().await;
}

#[tokio::test]
async fn test_search_after_indexing_returns_ranked_snippets() {
    let (origin, _) = fixture_repo(&[("mathutil/math.go", GO_FIXTURE)]);
    let h = harness().await;

    h.service
        .add_repository(origin.path().to_str().unwrap(), TrackingConfig::Default)
        .await
        .unwrap();
    wait_for_quiescence(&h).await;

    let results = h.service.search("add numbers", 10).await.unwrap();
    assert!(!results.is_empty());
    assert!(results[0].score > 0.0);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

    // Unindexed vocabulary still answers, just with nothing
    let nothing = h.service.search("quaternion kalman filter", 10).await.unwrap();
    assert!(nothing.len() <= 10);

    h.pool.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_add_is_a_validation_error_with_no_tasks() {
    let (origin, _) = fixture_repo(&[("main.go", "package main\n\nfunc Run() {}\n")]);
    let h = harness().await;
    let url = origin.path().to_str().unwrap().to_string();

    h.service
        .add_repository(&url, TrackingConfig::Default)
        .await
        .unwrap();
    wait_for_quiescence(&h).await;

    let err = h
        .service
        .add_repository(&url, TrackingConfig::Default)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"), "{err}");

    // The failed add enqueued nothing
    assert!(h.service.queue_drained().await.unwrap());
    assert_eq!(h.service.list_repositories().await.unwrap().len(), 1);

    h.pool.shutdown().await;
}

#[tokio::test]
async fn test_second_sync_without_changes_is_idempotent() {
    let (origin, commit_sha) = fixture_repo(&[("mathutil/math.go", GO_FIXTURE)]);
    let h = harness().await;

    let repo = h
        .service
        .add_repository(origin.path().to_str().unwrap(), TrackingConfig::Default)
        .await
        .unwrap();
    wait_for_quiescence(&h).await;
    let before = counts(&h, repo.id, &commit_sha).await;

    h.service.sync(repo.id).await.unwrap();
    wait_for_quiescence(&h).await;

    let after = counts(&h, repo.id, &commit_sha).await;
    assert_eq!(before, after, "no remote changes, no table changes");

    h.pool.shutdown().await;
}

#[tokio::test]
async fn test_rescan_restores_index_counts() {
    let (origin, commit_sha) = fixture_repo(&[("mathutil/math.go", GO_FIXTURE)]);
    let h = harness().await;

    let repo = h
        .service
        .add_repository(origin.path().to_str().unwrap(), TrackingConfig::Default)
        .await
        .unwrap();
    wait_for_quiescence(&h).await;
    let before = counts(&h, repo.id, &commit_sha).await;
    assert!(before.bm25 > 0);

    h.service.rescan(repo.id, &commit_sha).await.unwrap();
    wait_for_quiescence(&h).await;

    let after = counts(&h, repo.id, &commit_sha).await;
    assert_eq!(before, after, "cleaned then re-created, not doubled");

    h.pool.shutdown().await;
}

#[tokio::test]
async fn test_rescan_rejects_bad_input() {
    let (origin, _) = fixture_repo(&[("main.go", "package main\n\nfunc Run() {}\n")]);
    let h = harness().await;

    let repo = h
        .service
        .add_repository(origin.path().to_str().unwrap(), TrackingConfig::Default)
        .await
        .unwrap();
    wait_for_quiescence(&h).await;

    let bad_sha = h.service.rescan(repo.id, "not-a-sha").await.unwrap_err();
    assert!(bad_sha.to_string().contains("not a commit SHA"));

    let unknown = h.service.rescan(repo.id, &"f".repeat(40)).await.unwrap_err();
    assert!(unknown.to_string().contains("not found"));

    h.pool.shutdown().await;
}

#[tokio::test]
async fn test_delete_removes_rows_and_working_copy() {
    let (origin, commit_sha) = fixture_repo(&[("mathutil/math.go", GO_FIXTURE)]);
    let h = harness().await;

    let repo = h
        .service
        .add_repository(origin.path().to_str().unwrap(), TrackingConfig::Default)
        .await
        .unwrap();
    wait_for_quiescence(&h).await;

    let clone_path = h
        .store
        .get(repo.id)
        .await
        .unwrap()
        .unwrap()
        .clone_path
        .unwrap();
    assert!(std::path::Path::new(&clone_path).exists());

    h.service.delete(repo.id).await.unwrap();
    wait_for_quiescence(&h).await;

    assert!(h.service.list_repositories().await.unwrap().is_empty());
    assert!(!std::path::Path::new(&clone_path).exists());

    let c = counts(&h, repo.id, &commit_sha).await;
    assert_eq!(c.commits, 0);
    assert_eq!(c.snippets, 0);
    assert_eq!(c.bm25, 0);
    assert_eq!(c.code_vectors, 0);
    assert_eq!(c.text_vectors, 0);

    h.pool.shutdown().await;
}

#[tokio::test]
async fn test_failed_tasks_surface_in_repository_status() {
    let h = harness().await;

    // A repository whose remote does not exist: the clone task retries,
    // exhausts its budget, and stays as a terminal failed row
    let repo = h
        .service
        .add_repository("/nonexistent/definitely/missing", TrackingConfig::Default)
        .await
        .unwrap();
    wait_for_quiescence(&h).await;

    let failed = h
        .queue
        .list(&TaskFilter {
            state: Some(TaskState::Failed),
            ..TaskFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1, "clone kept as failed for observability");
    assert!(failed[0].retry_count > 0);

    let summary = h.service.status(repo.id).await.unwrap();
    assert_eq!(
        summary.status,
        kodit_data::models::SummaryStatus::Failed
    );
    assert!(summary.message.is_some());

    h.pool.shutdown().await;
}
