//! kodit command-line interface
//!
//! `serve` runs the worker pool (and the periodic sync scheduler when
//! enabled) until interrupted. The one-shot commands enqueue a user
//! intent, run workers until the queue drains, and print the outcome.

mod bootstrap;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kodit_config::AppConfig;
use kodit_data::models::TrackingConfig;
use kodit_indexing::PeriodicSyncScheduler;

#[derive(Parser)]
#[command(name = "kodit", version, about = "Code indexing and hybrid search over git repositories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the indexing workers until interrupted
    Serve,

    /// Register a repository and index it
    Add {
        /// Remote URL or local path of the repository
        url: String,
        /// Track a specific branch instead of the default branch
        #[arg(long, conflicts_with_all = ["tag", "commit"])]
        branch: Option<String>,
        /// Track a tag
        #[arg(long, conflicts_with_all = ["branch", "commit"])]
        tag: Option<String>,
        /// Pin a single commit
        #[arg(long, conflicts_with_all = ["branch", "tag"])]
        commit: Option<String>,
    },

    /// Re-sync an existing repository
    Sync {
        repository_id: i64,
    },

    /// Clean and re-index one commit
    Rescan {
        repository_id: i64,
        commit_sha: String,
    },

    /// Remove a repository and everything derived from it
    Delete {
        repository_id: i64,
    },

    /// Hybrid keyword + vector search over indexed snippets
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show repository indexing status
    Status {
        /// Restrict to one repository
        repository_id: Option<i64>,
    },
}

fn tracking_from_flags(
    branch: Option<String>,
    tag: Option<String>,
    commit: Option<String>,
) -> TrackingConfig {
    match (branch, tag, commit) {
        (Some(name), _, _) => TrackingConfig::Branch(name),
        (_, Some(name), _) => TrackingConfig::Tag(name),
        (_, _, Some(sha)) => TrackingConfig::Commit(sha),
        _ => TrackingConfig::Default,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    config.validate()?;

    let ctx = bootstrap::build_context(config).await?;
    let service = bootstrap::service(&ctx);

    match cli.command {
        Command::Serve => {
            service.validate_providers().await?;

            let token = CancellationToken::new();
            let pool = bootstrap::start_workers(&ctx, token.clone()).await?;

            let scheduler = ctx.config.periodic_sync.enabled.then(|| {
                PeriodicSyncScheduler::spawn(
                    std::sync::Arc::clone(&ctx),
                    Duration::from_secs(ctx.config.periodic_sync.interval_seconds),
                    token.clone(),
                )
            });

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown requested");
            token.cancel();
            pool.shutdown().await;
            if let Some(handle) = scheduler {
                let _ = handle.await;
            }
        }

        Command::Add {
            url,
            branch,
            tag,
            commit,
        } => {
            service.validate_providers().await?;
            let repo = service
                .add_repository(&url, tracking_from_flags(branch, tag, commit))
                .await?;
            println!("registered repository {} (id {})", repo.sanitized_url, repo.id);
            drain_queue(&ctx, &service).await?;
            print_status(&service, repo.id).await?;
        }

        Command::Sync { repository_id } => {
            service.validate_providers().await?;
            service.sync(repository_id).await?;
            drain_queue(&ctx, &service).await?;
            print_status(&service, repository_id).await?;
        }

        Command::Rescan {
            repository_id,
            commit_sha,
        } => {
            service.validate_providers().await?;
            service.rescan(repository_id, &commit_sha).await?;
            drain_queue(&ctx, &service).await?;
            print_status(&service, repository_id).await?;
        }

        Command::Delete { repository_id } => {
            service.delete(repository_id).await?;
            drain_queue(&ctx, &service).await?;
            println!("repository {repository_id} deleted");
        }

        Command::Search { query, limit } => {
            let results = service.search(&query, limit).await?;
            if results.is_empty() {
                println!("no results");
            }
            for (rank, result) in results.iter().enumerate() {
                println!(
                    "{:>2}. [{:.4}] {} ({})",
                    rank + 1,
                    result.score,
                    result.snippet.derives_from.join(", "),
                    result.snippet.extension,
                );
                for line in result.snippet.content.lines().take(8) {
                    println!("      {line}");
                }
                println!();
            }
        }

        Command::Status { repository_id } => {
            let repos = match repository_id {
                Some(id) => vec![
                    service
                        .list_repositories()
                        .await?
                        .into_iter()
                        .find(|r| r.id == id)
                        .ok_or_else(|| anyhow::anyhow!("repository {id} not found"))?,
                ],
                None => service.list_repositories().await?,
            };
            if repos.is_empty() {
                println!("no repositories");
            }
            for repo in repos {
                let summary = service.status(repo.id).await?;
                println!(
                    "{:>4}  {:<50}  {}  {}",
                    repo.id,
                    repo.sanitized_url,
                    summary.status,
                    summary.message.as_deref().unwrap_or(""),
                );
            }
        }
    }

    Ok(())
}

/// Run workers until the queue is empty, then stop them
async fn drain_queue(
    ctx: &std::sync::Arc<kodit_indexing::HandlerContext>,
    service: &kodit_indexing::RepositoryService,
) -> Result<()> {
    let token = CancellationToken::new();
    let pool = bootstrap::start_workers(ctx, token.clone()).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3600);
    let mut settled = 0;
    loop {
        if tokio::time::Instant::now() > deadline {
            pool.shutdown().await;
            bail!("indexing did not finish within an hour; run `kodit serve` to resume");
        }
        if service.queue_drained().await? && pool.idle() {
            settled += 1;
            if settled >= 2 {
                break;
            }
        } else {
            settled = 0;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    pool.shutdown().await;
    Ok(())
}

async fn print_status(
    service: &kodit_indexing::RepositoryService,
    repository_id: i64,
) -> Result<()> {
    let summary = service.status(repository_id).await?;
    println!(
        "status: {}{}",
        summary.status,
        summary
            .message
            .as_deref()
            .map(|m| format!(" ({m})"))
            .unwrap_or_default(),
    );
    Ok(())
}
