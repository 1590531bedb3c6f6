//! Store traits for dependency injection and testing
//!
//! Every persistence seam the core touches is a trait so handlers can be
//! exercised against in-memory fakes and the SQL implementations can be
//! swapped per dialect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::DatabaseResult;
use crate::models::{
    CommitFile, Enrichment, EnrichmentEntityType, EnrichmentType, GitBranch, GitCommit, GitTag,
    Repository, Snippet, Task, TaskOperation, TaskPayload, TaskState, TaskStatus, TaskStatusState,
    TrackableType, TrackingConfig,
};

/// Repository table operations
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Insert a repository
    ///
    /// Fails with a constraint violation when the sanitised URL already
    /// exists.
    async fn create(
        &self,
        remote_url: &str,
        sanitized_url: &str,
        tracking: &TrackingConfig,
    ) -> DatabaseResult<Repository>;

    async fn get(&self, id: i64) -> DatabaseResult<Option<Repository>>;

    async fn get_by_url(&self, sanitized_url: &str) -> DatabaseResult<Option<Repository>>;

    async fn all(&self) -> DatabaseResult<Vec<Repository>>;

    async fn set_clone_path(&self, id: i64, clone_path: &str) -> DatabaseResult<()>;

    async fn set_last_synced(&self, id: i64, at: DateTime<Utc>) -> DatabaseResult<()>;

    /// Repositories whose last sync is older than `cutoff`, plus those
    /// never synced; drives the periodic re-sync scheduler
    async fn synced_before(&self, cutoff: DateTime<Utc>) -> DatabaseResult<Vec<Repository>>;

    async fn delete(&self, id: i64) -> DatabaseResult<()>;
}

/// Commit, branch, tag and commit-file operations
#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Upsert by the `(repo_id, sha)` natural key
    async fn save_commit(&self, commit: &GitCommit) -> DatabaseResult<()>;

    async fn get_commit(&self, repo_id: i64, sha: &str) -> DatabaseResult<Option<GitCommit>>;

    async fn commits_for_repo(&self, repo_id: i64) -> DatabaseResult<Vec<GitCommit>>;

    /// Replace the branch table for a repository with the given set
    async fn replace_branches(&self, repo_id: i64, branches: &[GitBranch]) -> DatabaseResult<()>;

    async fn branches_for_repo(&self, repo_id: i64) -> DatabaseResult<Vec<GitBranch>>;

    async fn replace_tags(&self, repo_id: i64, tags: &[GitTag]) -> DatabaseResult<()>;

    async fn tags_for_repo(&self, repo_id: i64) -> DatabaseResult<Vec<GitTag>>;

    /// Record commit files; idempotent by `(commit_sha, blob_sha)`
    async fn save_files(&self, files: &[CommitFile]) -> DatabaseResult<()>;

    async fn files_for_commit(&self, commit_sha: &str) -> DatabaseResult<Vec<CommitFile>>;

    /// Remove every commit, branch, tag and commit-file row of a
    /// repository; the delete handler's bulk path
    async fn delete_repo_data(&self, repo_id: i64) -> DatabaseResult<()>;
}

/// Content-addressed snippet operations
#[async_trait]
pub trait SnippetStore: Send + Sync {
    /// Save snippets and associate them with a commit
    ///
    /// Snippet rows upsert by SHA (identical content shares one row);
    /// associations upsert by `(snippet_sha, commit_sha)`.
    async fn save_snippets(
        &self,
        repo_id: i64,
        commit_sha: &str,
        snippets: &[Snippet],
    ) -> DatabaseResult<()>;

    async fn snippets_for_commit(&self, commit_sha: &str) -> DatabaseResult<Vec<Snippet>>;

    async fn snippets_by_shas(&self, shas: &[String]) -> DatabaseResult<Vec<Snippet>>;

    async fn has_snippets_for_commit(&self, commit_sha: &str) -> DatabaseResult<bool>;

    /// Drop the snippet associations of one commit (rescan cleanup);
    /// snippet rows themselves survive until orphaned
    async fn delete_associations_for_commit(&self, commit_sha: &str) -> DatabaseResult<u64>;

    /// Remove snippet rows no commit references any more
    async fn delete_orphaned_snippets(&self) -> DatabaseResult<u64>;
}

/// Enrichment rows plus their entity associations
#[async_trait]
pub trait EnrichmentStore: Send + Sync {
    async fn save_for_entity(
        &self,
        entity_type: EnrichmentEntityType,
        entity_id: &str,
        kind: EnrichmentType,
        subtype: Option<&str>,
        content: &str,
    ) -> DatabaseResult<i64>;

    /// Enrichments of one kind for a batch of entities, keyed by entity id
    async fn for_entities(
        &self,
        entity_type: EnrichmentEntityType,
        entity_ids: &[String],
        kind: EnrichmentType,
    ) -> DatabaseResult<HashMap<String, Vec<Enrichment>>>;

    async fn delete_for_entities(
        &self,
        entity_type: EnrichmentEntityType,
        entity_ids: &[String],
    ) -> DatabaseResult<u64>;
}

/// Filter for [`TaskQueue::list`]
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub repository_id: Option<i64>,
    pub state: Option<TaskState>,
    pub operation: Option<TaskOperation>,
}

/// Durable priority task queue
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(
        &self,
        operation: TaskOperation,
        payload: &TaskPayload,
        priority: i64,
    ) -> DatabaseResult<()>;

    /// Enqueue a prescribed chain with strictly decreasing priorities so
    /// earlier items dequeue first within the base priority band
    async fn enqueue_operations(
        &self,
        operations: &[TaskOperation],
        base_priority: i64,
        payload: &TaskPayload,
    ) -> DatabaseResult<()>;

    /// Claim the highest-priority pending task (FIFO within a band)
    ///
    /// The claim is atomic: no two callers ever receive the same task.
    async fn dequeue(&self) -> DatabaseResult<Option<Task>>;

    /// Delete a successfully completed task
    async fn complete(&self, task: &Task) -> DatabaseResult<()>;

    /// Record a failure; returns true when the task was re-queued for
    /// retry, false when the retry cap terminally failed it
    async fn fail(&self, task: &Task, error: &str) -> DatabaseResult<bool>;

    /// Terminally fail a task regardless of its retry budget
    /// (validation errors, missing handlers)
    async fn fail_permanently(&self, task: &Task, error: &str) -> DatabaseResult<()>;

    async fn list(&self, filter: &TaskFilter) -> DatabaseResult<Vec<Task>>;

    /// Pending (and retry-scheduled) task count for one repository
    async fn pending_count(&self, repository_id: i64) -> DatabaseResult<i64>;

    /// Remove all tasks of a repository regardless of state
    async fn delete_for_repository(&self, repository_id: i64) -> DatabaseResult<u64>;

    /// Startup recovery: a crashed worker is indistinguishable from a
    /// timed-out handler, so every `started` task resets to `pending`
    async fn recover_started(&self) -> DatabaseResult<u64>;
}

/// One write from a tracker into the status table
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub trackable_type: TrackableType,
    pub trackable_id: i64,
    pub operation: TaskOperation,
    pub state: TaskStatusState,
    pub current: i64,
    pub total: i64,
    pub error: Option<String>,
    pub message: Option<String>,
}

/// Long-lived per-operation status records
#[async_trait]
pub trait TaskStatusStore: Send + Sync {
    /// Insert or update the `(trackable, operation)` row
    async fn upsert(&self, update: &StatusUpdate) -> DatabaseResult<()>;

    async fn statuses_for(
        &self,
        trackable_type: TrackableType,
        trackable_id: i64,
    ) -> DatabaseResult<Vec<TaskStatus>>;

    async fn delete_for(
        &self,
        trackable_type: TrackableType,
        trackable_id: i64,
    ) -> DatabaseResult<u64>;
}
