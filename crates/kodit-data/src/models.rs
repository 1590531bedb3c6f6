//! Domain models for database entities

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Format a timestamp the way every table stores it: fixed-width RFC 3339
/// UTC with microseconds, so lexicographic order equals time order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`format_ts`]
///
/// # Errors
///
/// Returns the chrono parse error for malformed input.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// What a repository is configured to keep indexed: at most one of a
/// branch, a tag, or a pinned commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TrackingConfig {
    /// Follow the default branch
    #[default]
    Default,
    Branch(String),
    Tag(String),
    Commit(String),
}

impl TrackingConfig {
    /// Column-pair encoding used by the repositories table
    pub fn to_columns(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Self::Default => (None, None),
            Self::Branch(name) => (Some("branch"), Some(name)),
            Self::Tag(name) => (Some("tag"), Some(name)),
            Self::Commit(sha) => (Some("commit"), Some(sha)),
        }
    }

    pub fn from_columns(kind: Option<&str>, value: Option<&str>) -> Self {
        match (kind, value) {
            (Some("branch"), Some(v)) => Self::Branch(v.to_string()),
            (Some("tag"), Some(v)) => Self::Tag(v.to_string()),
            (Some("commit"), Some(v)) => Self::Commit(v.to_string()),
            _ => Self::Default,
        }
    }
}

/// A tracked git repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    /// Remote URL as given; what git operations use
    pub remote_url: String,
    /// Canonical form of the URL; unique across the store and the
    /// relative clone path
    pub sanitized_url: String,
    /// Local working copy; present once cloning has succeeded
    pub clone_path: Option<String>,
    pub tracking: TrackingConfig,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One commit of a tracked repository; identity is `(repo_id, sha)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCommit {
    pub repo_id: i64,
    pub sha: String,
    pub parent_sha: Option<String>,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitBranch {
    pub repo_id: i64,
    pub name: String,
    pub head_sha: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitTag {
    pub repo_id: i64,
    pub name: String,
    pub target_sha: String,
}

/// A file recorded for a commit; idempotent by `(commit_sha, blob_sha)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitFile {
    pub repo_id: i64,
    pub commit_sha: String,
    pub path: String,
    pub blob_sha: String,
    pub size: i64,
    pub mime_type: Option<String>,
}

/// The content-addressed unit of indexing
///
/// Two snippets with identical content share a SHA and a single row;
/// associations to commits are many-to-many.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    /// SHA-256 of `content`, lowercase hex
    pub sha: String,
    pub content: String,
    pub extension: String,
    /// Repo-relative paths of the files this snippet derives from
    pub derives_from: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Enrichment attached to a snippet, commit, or repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub id: i64,
    pub kind: EnrichmentType,
    pub subtype: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentType {
    Summary,
    CodeExample,
    ApiDoc,
    DatabaseSchema,
    PhysicalArchitecture,
    CookbookContext,
}

impl std::fmt::Display for EnrichmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Summary => "summary",
            Self::CodeExample => "code_example",
            Self::ApiDoc => "api_doc",
            Self::DatabaseSchema => "database_schema",
            Self::PhysicalArchitecture => "physical_architecture",
            Self::CookbookContext => "cookbook_context",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for EnrichmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(Self::Summary),
            "code_example" => Ok(Self::CodeExample),
            "api_doc" => Ok(Self::ApiDoc),
            "database_schema" => Ok(Self::DatabaseSchema),
            "physical_architecture" => Ok(Self::PhysicalArchitecture),
            "cookbook_context" => Ok(Self::CookbookContext),
            _ => Err(format!("unknown enrichment type: {s}")),
        }
    }
}

/// What an enrichment is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentEntityType {
    Snippet,
    Commit,
    Repository,
}

impl std::fmt::Display for EnrichmentEntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Snippet => "snippet",
            Self::Commit => "commit",
            Self::Repository => "repository",
        };
        write!(f, "{name}")
    }
}

/// The fixed set of operation kinds the handler registry recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskOperation {
    CloneRepository,
    SyncRepository,
    ScanCommit,
    ExtractSnippetsForCommit,
    CreateBm25IndexForCommit,
    CreateCodeEmbeddingsForCommit,
    CreateTextEmbeddingsForCommit,
    EnrichCommit,
    RescanCommit,
    DeleteRepository,
}

impl TaskOperation {
    pub const ALL: [Self; 10] = [
        Self::CloneRepository,
        Self::SyncRepository,
        Self::ScanCommit,
        Self::ExtractSnippetsForCommit,
        Self::CreateBm25IndexForCommit,
        Self::CreateCodeEmbeddingsForCommit,
        Self::CreateTextEmbeddingsForCommit,
        Self::EnrichCommit,
        Self::RescanCommit,
        Self::DeleteRepository,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CloneRepository => "clone_repository",
            Self::SyncRepository => "sync_repository",
            Self::ScanCommit => "scan_commit",
            Self::ExtractSnippetsForCommit => "extract_snippets_for_commit",
            Self::CreateBm25IndexForCommit => "create_bm25_index_for_commit",
            Self::CreateCodeEmbeddingsForCommit => "create_code_embeddings_for_commit",
            Self::CreateTextEmbeddingsForCommit => "create_text_embeddings_for_commit",
            Self::EnrichCommit => "enrich_commit",
            Self::RescanCommit => "rescan_commit",
            Self::DeleteRepository => "delete_repository",
        }
    }
}

impl std::fmt::Display for TaskOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown task operation: {s}"))
    }
}

/// Task payload; scalar fields only so re-runs see exactly what the
/// enqueuer saw
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub repository_id: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub commit_sha: Option<String>,
}

impl TaskPayload {
    pub const fn for_repository(repository_id: i64) -> Self {
        Self {
            repository_id,
            commit_sha: None,
        }
    }

    pub const fn for_commit(repository_id: i64, commit_sha: String) -> Self {
        Self {
            repository_id,
            commit_sha: Some(commit_sha),
        }
    }
}

/// Queue-visible state of a task row
///
/// Successful tasks are deleted, so there is no terminal success state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Started,
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid task state: {s}")),
        }
    }
}

/// A queued unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub operation: TaskOperation,
    pub payload: TaskPayload,
    /// Higher dequeues first; ties break by lowest id
    pub priority: i64,
    pub state: TaskState,
    pub retry_count: i64,
    pub last_error: Option<String>,
    /// Not eligible for dequeue before this instant (retry backoff)
    pub visible_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// State of the most recent execution of a `(trackable, operation)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatusState {
    Pending,
    Started,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

impl TaskStatusState {
    /// Terminal states never transition without a fresh handler run
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for TaskStatusState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid task status state: {s}")),
        }
    }
}

/// What a task status row tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackableType {
    Repository,
}

impl std::fmt::Display for TrackableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repository => write!(f, "repository"),
        }
    }
}

/// Long-lived record of the most recent execution of an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: i64,
    pub trackable_type: TrackableType,
    pub trackable_id: i64,
    pub operation: TaskOperation,
    pub state: TaskStatusState,
    pub current: i64,
    pub total: i64,
    pub error: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derived, single user-visible view of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStatusSummary {
    pub status: SummaryStatus,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Pending,
    InProgress,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl std::fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}
