//! Worker pool
//!
//! A configurable number of workers poll the durable queue, dispatch to
//! the handler registry, and drive the tracker through the execution.
//! Cancellation of the root token stops every worker within one poll
//! period; a task in flight at that moment stays `started` and is
//! reclaimed by the startup recovery pass of the next run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kodit_common::{CorrelationId, IntoErrorKind};
use kodit_data::models::Task;
use kodit_data::traits::{TaskQueue, TaskStatusStore};

use crate::handlers::HandlerRegistry;
use crate::tracker::{Reporter, Tracker, TracingReporter};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    idle_flags: Arc<Vec<AtomicBool>>,
    token: CancellationToken,
}

struct WorkerShared {
    queue: Arc<dyn TaskQueue>,
    registry: HandlerRegistry,
    statuses: Arc<dyn TaskStatusStore>,
    reporters: Vec<Arc<dyn Reporter>>,
    poll_period: Duration,
}

impl WorkerPool {
    /// Recover in-flight tasks from a previous run and start `count`
    /// workers
    ///
    /// # Errors
    ///
    /// Returns an error when the startup recovery write fails.
    pub async fn start(
        count: usize,
        queue: Arc<dyn TaskQueue>,
        registry: HandlerRegistry,
        statuses: Arc<dyn TaskStatusStore>,
        extra_reporters: Vec<Arc<dyn Reporter>>,
        poll_period: Duration,
        token: CancellationToken,
    ) -> kodit_data::DatabaseResult<Self> {
        queue.recover_started().await?;

        let mut reporters: Vec<Arc<dyn Reporter>> = vec![Arc::new(TracingReporter)];
        reporters.extend(extra_reporters);

        let shared = Arc::new(WorkerShared {
            queue,
            registry,
            statuses,
            reporters,
            poll_period,
        });

        let idle_flags: Arc<Vec<AtomicBool>> =
            Arc::new((0..count).map(|_| AtomicBool::new(true)).collect());

        let handles = (0..count)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                let idle_flags = Arc::clone(&idle_flags);
                let token = token.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, shared, idle_flags, token).await;
                })
            })
            .collect();

        Ok(Self {
            handles,
            idle_flags,
            token,
        })
    }

    /// True when every worker is blocked on dequeue with no active
    /// handler; used by tests to detect quiescence
    pub fn idle(&self) -> bool {
        self.idle_flags
            .iter()
            .all(|flag| flag.load(Ordering::SeqCst))
    }

    /// Cancel the root token and join all workers
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<WorkerShared>,
    idle_flags: Arc<Vec<AtomicBool>>,
    token: CancellationToken,
) {
    tracing::debug!(worker_id, "worker starting");

    loop {
        if token.is_cancelled() {
            break;
        }

        match shared.queue.dequeue().await {
            Ok(Some(task)) => {
                idle_flags[worker_id].store(false, Ordering::SeqCst);
                handle_task(worker_id, &shared, &token, task).await;
                idle_flags[worker_id].store(true, Ordering::SeqCst);
            }
            Ok(None) => {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(shared.poll_period) => {}
                }
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "dequeue failed, backing off");
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(shared.poll_period * 5) => {}
                }
            }
        }
    }

    tracing::debug!(worker_id, "worker shutting down");
}

async fn handle_task(
    worker_id: usize,
    shared: &WorkerShared,
    token: &CancellationToken,
    task: Task,
) {
    let tracker = Arc::new(Tracker::new(
        Arc::clone(&shared.statuses),
        shared.reporters.clone(),
        task.payload.repository_id,
        task.operation,
    ));

    let Some(handler) = shared.registry.get(task.operation) else {
        // Nothing will ever handle this; no point burning retries
        let message = format!("no handler registered for {}", task.operation);
        tracker.fail(message.clone()).await;
        if let Err(e) = shared.queue.fail_permanently(&task, &message).await {
            tracing::error!(task_id = task.id, error = %e, "failed to mark task failed");
        }
        return;
    };

    // One id ties every log line of this execution together
    let correlation_id = CorrelationId::new();
    tracing::debug!(
        worker_id,
        task_id = task.id,
        correlation_id = %correlation_id,
        operation = %task.operation,
        repository_id = task.payload.repository_id,
        "task picked up"
    );
    tracker.started().await;

    let outcome = tokio::select! {
        // On shutdown the handler is dropped mid-flight; the task stays
        // `started` and the next startup recovers it
        () = token.cancelled() => {
            tracing::info!(task_id = task.id, "handler cancelled by shutdown");
            return;
        }
        outcome = handler.run(&task, Arc::clone(&tracker)) => outcome,
    };

    match outcome {
        Ok(()) => {
            tracker.complete().await;
            if let Err(e) = shared.queue.complete(&task).await {
                tracing::error!(task_id = task.id, error = %e, "failed to delete completed task");
            }
            tracing::debug!(
                task_id = task.id,
                correlation_id = %correlation_id,
                operation = %task.operation,
                "task completed"
            );
        }
        Err(error) => {
            let message = error.to_string();
            tracker.fail(message.clone()).await;

            if error.error_kind().is_retryable() {
                if let Err(e) = shared.queue.fail(&task, &message).await {
                    tracing::error!(task_id = task.id, error = %e, "failed to record task failure");
                }
            } else if let Err(e) = shared.queue.fail_permanently(&task, &message).await {
                tracing::error!(task_id = task.id, error = %e, "failed to record task failure");
            }
        }
    }
}
