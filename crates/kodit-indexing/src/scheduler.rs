//! Periodic sync scheduler
//!
//! When enabled, enqueues a `SyncRepository` chain for every repository
//! whose last sync is older than the configured interval. Repositories
//! with queue work still pending are left alone so a slow index run
//! does not pile syncs behind itself.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kodit_data::models::TaskPayload;

use crate::handlers::HandlerContext;
use crate::operations::{PrescribedOperation, PRIORITY_BACKGROUND};

pub struct PeriodicSyncScheduler;

impl PeriodicSyncScheduler {
    /// Spawn the scheduler loop; returns immediately
    pub fn spawn(
        ctx: Arc<HandlerContext>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "periodic sync enabled");
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would re-sync everything at boot
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = run_sweep(&ctx, interval).await {
                    tracing::warn!(error = %e, "periodic sync sweep failed");
                }
            }
            tracing::debug!("periodic sync scheduler stopped");
        })
    }
}

async fn run_sweep(ctx: &HandlerContext, interval: Duration) -> kodit_data::DatabaseResult<()> {
    let cutoff = Utc::now() - ChronoDuration::seconds(interval.as_secs() as i64);
    let due = ctx.repositories.synced_before(cutoff).await?;

    for repo in due {
        if ctx.queue.pending_count(repo.id).await? > 0 {
            tracing::debug!(repository = %repo.sanitized_url, "sync deferred, work pending");
            continue;
        }
        ctx.queue
            .enqueue_operations(
                &PrescribedOperation::SyncRepository.operations(),
                PRIORITY_BACKGROUND,
                &TaskPayload::for_repository(repo.id),
            )
            .await?;
        tracing::info!(repository = %repo.sanitized_url, "periodic sync enqueued");
    }
    Ok(())
}
