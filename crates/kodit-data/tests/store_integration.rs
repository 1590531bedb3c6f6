//! Entity store integration tests against in-memory SQLite

use chrono::Utc;
use kodit_data::models::{
    CommitFile, EnrichmentEntityType, EnrichmentType, GitBranch, GitCommit, GitTag, Snippet,
    TrackingConfig,
};
use kodit_data::traits::{CommitStore, EnrichmentStore, RepositoryStore, SnippetStore};
use kodit_data::{DbPool, SqlStore};

async fn store() -> SqlStore {
    let db = DbPool::initialize("sqlite::memory:", 1).await.unwrap();
    SqlStore::new(db)
}

fn snippet(content: &str) -> Snippet {
    use sha2::{Digest, Sha256};
    let sha = format!("{:x}", Sha256::digest(content.as_bytes()));
    Snippet {
        sha,
        content: content.to_string(),
        extension: "go".to_string(),
        derives_from: vec!["main.go".to_string()],
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_repository_url_is_unique() {
    let s = store().await;
    s.create(
        "https://github.com/acme/app.git",
        "github.com/acme/app",
        &TrackingConfig::Default,
    )
        .await
        .unwrap();

    let duplicate = s
        .create(
            "git@github.com:acme/app.git",
            "github.com/acme/app",
            &TrackingConfig::Default,
        )
        .await;
    assert!(duplicate.is_err(), "duplicate sanitised URL must be rejected");
}

#[tokio::test]
async fn test_repository_round_trip_with_tracking() {
    let s = store().await;
    let created = s
        .create(
            "https://github.com/acme/app.git",
            "github.com/acme/app",
            &TrackingConfig::Branch("develop".to_string()),
        )
        .await
        .unwrap();

    let found = s.get(created.id).await.unwrap().unwrap();
    assert_eq!(found.remote_url, "https://github.com/acme/app.git");
    assert_eq!(found.sanitized_url, "github.com/acme/app");
    assert_eq!(found.tracking, TrackingConfig::Branch("develop".to_string()));
    assert!(found.clone_path.is_none());

    s.set_clone_path(created.id, "/data/clones/github.com-acme-app")
        .await
        .unwrap();
    let found = s.get(created.id).await.unwrap().unwrap();
    assert_eq!(
        found.clone_path.as_deref(),
        Some("/data/clones/github.com-acme-app")
    );
}

#[tokio::test]
async fn test_synced_before_includes_never_synced() {
    let s = store().await;
    let fresh = s
        .create(
            "https://github.com/acme/fresh.git",
            "github.com/acme/fresh",
            &TrackingConfig::Default,
        )
        .await
        .unwrap();
    let stale = s
        .create(
            "https://github.com/acme/stale.git",
            "github.com/acme/stale",
            &TrackingConfig::Default,
        )
        .await
        .unwrap();

    s.set_last_synced(fresh.id, Utc::now()).await.unwrap();
    s.set_last_synced(stale.id, Utc::now() - chrono::Duration::hours(2))
        .await
        .unwrap();
    let never = s
        .create(
            "https://github.com/acme/never.git",
            "github.com/acme/never",
            &TrackingConfig::Default,
        )
        .await
        .unwrap();

    let due = s
        .synced_before(Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    let ids: Vec<i64> = due.iter().map(|r| r.id).collect();
    assert!(ids.contains(&stale.id));
    assert!(ids.contains(&never.id));
    assert!(!ids.contains(&fresh.id));
}

#[tokio::test]
async fn test_commit_save_is_idempotent() {
    let s = store().await;
    let commit = GitCommit {
        repo_id: 1,
        sha: "a".repeat(40),
        parent_sha: None,
        author_name: "Ada".to_string(),
        author_email: "ada@example.com".to_string(),
        message: "initial".to_string(),
        committed_at: Utc::now(),
    };

    s.save_commit(&commit).await.unwrap();
    s.save_commit(&commit).await.unwrap();

    assert_eq!(s.commits_for_repo(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_branch_replacement_keeps_single_default() {
    let s = store().await;
    let branches = vec![
        GitBranch {
            repo_id: 1,
            name: "main".to_string(),
            head_sha: "a".repeat(40),
            is_default: true,
        },
        GitBranch {
            repo_id: 1,
            name: "feature".to_string(),
            head_sha: "b".repeat(40),
            is_default: false,
        },
    ];
    s.replace_branches(1, &branches).await.unwrap();
    s.replace_branches(1, &branches).await.unwrap();

    let stored = s.branches_for_repo(1).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored.iter().filter(|b| b.is_default).count(), 1);

    let tags = vec![GitTag {
        repo_id: 1,
        name: "v1.0".to_string(),
        target_sha: "a".repeat(40),
    }];
    s.replace_tags(1, &tags).await.unwrap();
    assert_eq!(s.tags_for_repo(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_commit_files_idempotent_by_commit_and_blob() {
    let s = store().await;
    let file = CommitFile {
        repo_id: 1,
        commit_sha: "c".repeat(40),
        path: "src/main.go".to_string(),
        blob_sha: "d".repeat(40),
        size: 120,
        mime_type: Some("text/x-go".to_string()),
    };

    s.save_files(std::slice::from_ref(&file)).await.unwrap();
    s.save_files(std::slice::from_ref(&file)).await.unwrap();

    assert_eq!(s.files_for_commit(&file.commit_sha).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_identical_snippet_content_shares_one_row() {
    let s = store().await;
    let commit_a = "a".repeat(40);
    let commit_b = "b".repeat(40);
    let snip = snippet("func Add(a, b int) int { return a + b }");

    s.save_snippets(1, &commit_a, std::slice::from_ref(&snip))
        .await
        .unwrap();
    s.save_snippets(1, &commit_b, std::slice::from_ref(&snip))
        .await
        .unwrap();

    // One content-addressed row, two commit associations
    let by_sha = s.snippets_by_shas(&[snip.sha.clone()]).await.unwrap();
    assert_eq!(by_sha.len(), 1);
    assert_eq!(s.snippets_for_commit(&commit_a).await.unwrap().len(), 1);
    assert_eq!(s.snippets_for_commit(&commit_b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_association_cleanup_then_orphan_sweep() {
    let s = store().await;
    let commit = "e".repeat(40);
    let snip = snippet("def main():\n    pass\n");

    s.save_snippets(1, &commit, std::slice::from_ref(&snip))
        .await
        .unwrap();
    assert!(s.has_snippets_for_commit(&commit).await.unwrap());

    assert_eq!(s.delete_associations_for_commit(&commit).await.unwrap(), 1);
    assert!(!s.has_snippets_for_commit(&commit).await.unwrap());

    // Row survives until the orphan sweep
    assert_eq!(s.snippets_by_shas(&[snip.sha.clone()]).await.unwrap().len(), 1);
    assert_eq!(s.delete_orphaned_snippets().await.unwrap(), 1);
    assert!(s.snippets_by_shas(&[snip.sha]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_enrichment_round_trip() {
    let s = store().await;
    let snip = snippet("fn run() {}");

    s.save_for_entity(
        EnrichmentEntityType::Snippet,
        &snip.sha,
        EnrichmentType::Summary,
        None,
        "Runs the thing.",
    )
    .await
    .unwrap();

    let found = s
        .for_entities(
            EnrichmentEntityType::Snippet,
            &[snip.sha.clone()],
            EnrichmentType::Summary,
        )
        .await
        .unwrap();
    assert_eq!(found[&snip.sha].len(), 1);
    assert_eq!(found[&snip.sha][0].content, "Runs the thing.");

    // Other kinds are invisible to a summary query
    let none = s
        .for_entities(
            EnrichmentEntityType::Snippet,
            &[snip.sha.clone()],
            EnrichmentType::ApiDoc,
        )
        .await
        .unwrap();
    assert!(none.is_empty());

    assert_eq!(
        s.delete_for_entities(EnrichmentEntityType::Snippet, &[snip.sha.clone()])
            .await
            .unwrap(),
        1
    );
    let after = s
        .for_entities(
            EnrichmentEntityType::Snippet,
            &[snip.sha],
            EnrichmentType::Summary,
        )
        .await
        .unwrap();
    assert!(after.is_empty());
}
