//! git2-backed adapter implementation

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use git2::{BranchType, ObjectType, Oid, Repository, TreeWalkMode, TreeWalkResult};
use std::path::{Path, PathBuf};

use crate::error::{GitError, GitResult};

/// A branch head as the sync handler sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    pub head_sha: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub name: String,
    pub target_sha: String,
}

/// One blob reachable from a commit tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub blob_sha: String,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDetails {
    pub sha: String,
    pub parent_sha: Option<String>,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub committed_at: DateTime<Utc>,
}

/// Git operations the handlers consume
#[async_trait]
pub trait GitAdapter: Send + Sync {
    async fn clone_repository(&self, remote_url: &str, local_path: &Path) -> GitResult<()>;

    async fn fetch(&self, local_path: &Path) -> GitResult<()>;

    /// Fetch and fast-forward the current branch to its upstream
    async fn pull(&self, local_path: &Path) -> GitResult<()>;

    async fn checkout_commit(&self, local_path: &Path, sha: &str) -> GitResult<()>;

    async fn all_branches(&self, local_path: &Path) -> GitResult<Vec<BranchInfo>>;

    async fn all_tags(&self, local_path: &Path) -> GitResult<Vec<TagInfo>>;

    async fn commit_files(&self, local_path: &Path, sha: &str) -> GitResult<Vec<FileEntry>>;

    async fn commit_details(&self, local_path: &Path, sha: &str) -> GitResult<CommitDetails>;

    async fn file_content(&self, local_path: &Path, sha: &str, path: &str) -> GitResult<Vec<u8>>;
}

/// Production adapter over libgit2
#[derive(Debug, Default, Clone)]
pub struct Git2Adapter;

impl Git2Adapter {
    pub const fn new() -> Self {
        Self
    }
}

async fn blocking<T, F>(f: F) -> GitResult<T>
where
    F: FnOnce() -> GitResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GitError::TaskJoin(e.to_string()))?
}

fn open(path: &Path) -> GitResult<Repository> {
    Repository::open(path).map_err(|source| GitError::Open {
        path: path.display().to_string(),
        source,
    })
}

fn parse_oid(sha: &str) -> GitResult<Oid> {
    if sha.len() != 40 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(GitError::InvalidSha(sha.to_string()));
    }
    Oid::from_str(sha).map_err(|_| GitError::InvalidSha(sha.to_string()))
}

fn commit_to_details(commit: &git2::Commit<'_>) -> CommitDetails {
    let author = commit.author();
    let committed_at = Utc
        .timestamp_opt(commit.time().seconds(), 0)
        .single()
        .unwrap_or_else(Utc::now);

    CommitDetails {
        sha: commit.id().to_string(),
        parent_sha: commit.parent_id(0).ok().map(|id| id.to_string()),
        author_name: author.name().unwrap_or("unknown").to_string(),
        author_email: author.email().unwrap_or("").to_string(),
        message: commit.message().unwrap_or("").to_string(),
        committed_at,
    }
}

/// Name of the default branch: origin/HEAD if the remote told us,
/// otherwise whatever HEAD points at locally.
fn default_branch_name(repo: &Repository) -> Option<String> {
    if let Ok(reference) = repo.find_reference("refs/remotes/origin/HEAD")
        && let Some(target) = reference.symbolic_target()
    {
        return Some(
            target
                .trim_start_matches("refs/remotes/origin/")
                .to_string(),
        );
    }

    repo.head()
        .ok()
        .filter(|head| head.is_branch())
        .and_then(|head| head.shorthand().map(String::from))
}

#[async_trait]
impl GitAdapter for Git2Adapter {
    async fn clone_repository(&self, remote_url: &str, local_path: &Path) -> GitResult<()> {
        let url = remote_url.to_string();
        let path = local_path.to_path_buf();

        blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| GitError::Clone {
                    url: url.clone(),
                    source: git2::Error::from_str(&e.to_string()),
                })?;
            }
            Repository::clone(&url, &path).map_err(|source| GitError::Clone {
                url: url.clone(),
                source,
            })?;
            tracing::info!(url = %url, path = %path.display(), "cloned repository");
            Ok(())
        })
        .await
    }

    async fn fetch(&self, local_path: &Path) -> GitResult<()> {
        let path = local_path.to_path_buf();
        blocking(move || {
            let repo = open(&path)?;
            let mut remote = repo
                .find_remote("origin")
                .map_err(|source| GitError::Fetch {
                    path: path.display().to_string(),
                    source,
                })?;
            remote
                .fetch(&[] as &[&str], None, None)
                .map_err(|source| GitError::Fetch {
                    path: path.display().to_string(),
                    source,
                })
        })
        .await
    }

    async fn pull(&self, local_path: &Path) -> GitResult<()> {
        self.fetch(local_path).await?;

        let path = local_path.to_path_buf();
        blocking(move || {
            let repo = open(&path)?;

            let head = match repo.head() {
                Ok(head) if head.is_branch() => head,
                // Detached HEAD (a pinned commit); fetch alone suffices
                _ => return Ok(()),
            };
            let branch_name = head.shorthand().unwrap_or("HEAD").to_string();

            let upstream_ref = format!("refs/remotes/origin/{branch_name}");
            let Ok(upstream) = repo.find_reference(&upstream_ref) else {
                return Ok(());
            };
            let Some(target) = upstream.target() else {
                return Ok(());
            };

            // Fast-forward only; diverged working copies are re-cloned by
            // the operator, not silently rewritten
            let analysis = repo.merge_analysis(&[&repo.find_annotated_commit(target)?])?;
            if analysis.0.is_up_to_date() {
                return Ok(());
            }
            if analysis.0.is_fast_forward() {
                let mut reference = repo.find_reference(&format!("refs/heads/{branch_name}"))?;
                reference.set_target(target, "kodit: fast-forward pull")?;
                repo.set_head(&format!("refs/heads/{branch_name}"))?;
                repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
            }
            Ok(())
        })
        .await
    }

    async fn checkout_commit(&self, local_path: &Path, sha: &str) -> GitResult<()> {
        let path = local_path.to_path_buf();
        let oid = parse_oid(sha)?;

        blocking(move || {
            let repo = open(&path)?;
            let commit = repo.find_commit(oid).map_err(|_| GitError::NotFound {
                what: "commit",
                key: oid.to_string(),
            })?;
            repo.checkout_tree(
                commit.as_object(),
                Some(git2::build::CheckoutBuilder::default().force()),
            )?;
            repo.set_head_detached(oid)?;
            Ok(())
        })
        .await
    }

    async fn all_branches(&self, local_path: &Path) -> GitResult<Vec<BranchInfo>> {
        let path = local_path.to_path_buf();
        blocking(move || {
            let repo = open(&path)?;
            let default = default_branch_name(&repo);
            let mut branches: Vec<BranchInfo> = Vec::new();

            for entry in repo.branches(Some(BranchType::Local))? {
                let (branch, _) = entry?;
                let Some(name) = branch.name()?.map(String::from) else {
                    continue;
                };
                let Some(target) = branch.get().target() else {
                    continue;
                };
                branches.push(BranchInfo {
                    is_default: default.as_deref() == Some(name.as_str()),
                    name,
                    head_sha: target.to_string(),
                });
            }

            // Remote-only branches count too; a fresh clone has local
            // refs for the default branch alone
            for entry in repo.branches(Some(BranchType::Remote))? {
                let (branch, _) = entry?;
                let Some(full) = branch.name()?.map(String::from) else {
                    continue;
                };
                let Some(name) = full.strip_prefix("origin/").map(String::from) else {
                    continue;
                };
                if name == "HEAD" || branches.iter().any(|b| b.name == name) {
                    continue;
                }
                let Some(target) = branch.get().target() else {
                    continue;
                };
                branches.push(BranchInfo {
                    is_default: default.as_deref() == Some(name.as_str()),
                    name,
                    head_sha: target.to_string(),
                });
            }

            branches.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(branches)
        })
        .await
    }

    async fn all_tags(&self, local_path: &Path) -> GitResult<Vec<TagInfo>> {
        let path = local_path.to_path_buf();
        blocking(move || {
            let repo = open(&path)?;
            let mut tags = Vec::new();

            for name in repo.tag_names(None)?.iter().flatten() {
                let Ok(object) = repo.revparse_single(&format!("refs/tags/{name}")) else {
                    continue;
                };
                let target = object
                    .peel(ObjectType::Commit)
                    .map(|c| c.id())
                    .unwrap_or_else(|_| object.id());
                tags.push(TagInfo {
                    name: name.to_string(),
                    target_sha: target.to_string(),
                });
            }

            tags.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(tags)
        })
        .await
    }

    async fn commit_files(&self, local_path: &Path, sha: &str) -> GitResult<Vec<FileEntry>> {
        let path = local_path.to_path_buf();
        let oid = parse_oid(sha)?;

        blocking(move || {
            let repo = open(&path)?;
            let commit = repo.find_commit(oid).map_err(|_| GitError::NotFound {
                what: "commit",
                key: oid.to_string(),
            })?;
            let tree = commit.tree()?;

            let mut files = Vec::new();
            tree.walk(TreeWalkMode::PreOrder, |root, entry| {
                if entry.kind() == Some(ObjectType::Blob) {
                    let file_path = format!("{root}{}", entry.name().unwrap_or(""));
                    let size = repo
                        .find_blob(entry.id())
                        .map(|blob| blob.size() as i64)
                        .unwrap_or(0);
                    files.push(FileEntry {
                        path: file_path,
                        blob_sha: entry.id().to_string(),
                        size,
                    });
                }
                TreeWalkResult::Ok
            })?;

            files.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(files)
        })
        .await
    }

    async fn commit_details(&self, local_path: &Path, sha: &str) -> GitResult<CommitDetails> {
        let path = local_path.to_path_buf();
        let oid = parse_oid(sha)?;

        blocking(move || {
            let repo = open(&path)?;
            let commit = repo.find_commit(oid).map_err(|_| GitError::NotFound {
                what: "commit",
                key: oid.to_string(),
            })?;
            Ok(commit_to_details(&commit))
        })
        .await
    }

    async fn file_content(&self, local_path: &Path, sha: &str, path: &str) -> GitResult<Vec<u8>> {
        let repo_path = local_path.to_path_buf();
        let oid = parse_oid(sha)?;
        let file_path = PathBuf::from(path);
        let key = path.to_string();

        blocking(move || {
            let repo = open(&repo_path)?;
            let commit = repo.find_commit(oid).map_err(|_| GitError::NotFound {
                what: "commit",
                key: oid.to_string(),
            })?;
            let tree = commit.tree()?;
            let entry = tree
                .get_path(&file_path)
                .map_err(|_| GitError::NotFound {
                    what: "file",
                    key,
                })?;
            let blob = repo.find_blob(entry.id())?;
            Ok(blob.content().to_vec())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Build a local fixture repository with one commit of `files`
    fn fixture_repo(files: &[(&str, &str)]) -> (TempDir, String) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let signature = git2::Signature::now("Test", "test@example.com").unwrap();

        for (name, content) in files {
            let full = dir.path().join(name);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(full, content).unwrap();
        }

        let mut index = repo.index().unwrap();
        index
            .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let commit_id = repo
            .commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])
            .unwrap();

        (dir, commit_id.to_string())
    }

    #[tokio::test]
    async fn test_clone_and_list_branches() {
        let (origin, _sha) = fixture_repo(&[("main.go", "package main\n")]);
        let target = TempDir::new().unwrap();
        let clone_path = target.path().join("clone");
        let adapter = Git2Adapter::new();

        adapter
            .clone_repository(origin.path().to_str().unwrap(), &clone_path)
            .await
            .unwrap();

        let branches = adapter.all_branches(&clone_path).await.unwrap();
        assert_eq!(branches.len(), 1);
        assert!(branches[0].is_default);
        assert_eq!(branches[0].head_sha.len(), 40);
    }

    #[tokio::test]
    async fn test_commit_files_walks_nested_tree() {
        let (origin, sha) = fixture_repo(&[
            ("main.go", "package main\n"),
            ("pkg/util/helper.go", "package util\n"),
        ]);
        let adapter = Git2Adapter::new();

        let files = adapter.commit_files(origin.path(), &sha).await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["main.go", "pkg/util/helper.go"]);
        assert!(files.iter().all(|f| f.size > 0 && f.blob_sha.len() == 40));
    }

    #[tokio::test]
    async fn test_file_content_and_details() {
        let (origin, sha) = fixture_repo(&[("lib.rs", "pub fn answer() -> u32 { 42 }\n")]);
        let adapter = Git2Adapter::new();

        let content = adapter
            .file_content(origin.path(), &sha, "lib.rs")
            .await
            .unwrap();
        assert_eq!(content, b"pub fn answer() -> u32 { 42 }\n");

        let details = adapter.commit_details(origin.path(), &sha).await.unwrap();
        assert_eq!(details.sha, sha);
        assert_eq!(details.author_name, "Test");
        assert_eq!(details.message, "initial");
        assert!(details.parent_sha.is_none());

        let missing = adapter.file_content(origin.path(), &sha, "nope.rs").await;
        assert!(matches!(missing, Err(GitError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_invalid_sha_is_rejected_before_io() {
        let adapter = Git2Adapter::new();
        let err = adapter
            .checkout_commit(Path::new("/nonexistent"), "not-a-sha")
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::InvalidSha(_)));
    }

    #[tokio::test]
    async fn test_checkout_commit_detaches_head() {
        let (origin, sha) = fixture_repo(&[("a.txt", "one\n")]);
        let target = TempDir::new().unwrap();
        let clone_path = target.path().join("clone");
        let adapter = Git2Adapter::new();

        adapter
            .clone_repository(origin.path().to_str().unwrap(), &clone_path)
            .await
            .unwrap();
        adapter.checkout_commit(&clone_path, &sha).await.unwrap();

        let repo = Repository::open(&clone_path).unwrap();
        assert!(repo.head_detached().unwrap());
    }
}
