//! Per-operation progress tracking
//!
//! A tracker is bound to one `(trackable, operation)` pair for the
//! duration of a handler run. Every transition writes a status row and
//! fans out to reporters. Status writes never fail a handler: a broken
//! status table is worth a warning, not a lost indexing run.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use kodit_data::models::{TaskOperation, TaskStatusState, TrackableType};
use kodit_data::traits::{StatusUpdate, TaskStatusStore};

/// Fan-out target for status transitions
pub trait Reporter: Send + Sync {
    fn report(&self, update: &StatusUpdate);
}

/// Logs every transition through tracing
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, update: &StatusUpdate) {
        tracing::debug!(
            operation = %update.operation,
            trackable_id = update.trackable_id,
            state = %update.state,
            current = update.current,
            total = update.total,
            message = update.message.as_deref().unwrap_or(""),
            "status transition"
        );
    }
}

/// Keeps the latest state per operation in memory; used by tests to
/// observe transitions without polling the database
#[derive(Default)]
pub struct InMemoryObserver {
    states: std::sync::Mutex<Vec<(TaskOperation, TaskStatusState)>>,
}

impl InMemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<(TaskOperation, TaskStatusState)> {
        self.states.lock().expect("observer lock").clone()
    }
}

impl Reporter for InMemoryObserver {
    fn report(&self, update: &StatusUpdate) {
        self.states
            .lock()
            .expect("observer lock")
            .push((update.operation, update.state));
    }
}

/// Progress writer for one handler execution
pub struct Tracker {
    store: Arc<dyn TaskStatusStore>,
    reporters: Vec<Arc<dyn Reporter>>,
    trackable_type: TrackableType,
    trackable_id: i64,
    operation: TaskOperation,
    current: AtomicI64,
    total: AtomicI64,
    finished: AtomicBool,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn TaskStatusStore>,
        reporters: Vec<Arc<dyn Reporter>>,
        trackable_id: i64,
        operation: TaskOperation,
    ) -> Self {
        Self {
            store,
            reporters,
            trackable_type: TrackableType::Repository,
            trackable_id,
            operation,
            current: AtomicI64::new(0),
            total: AtomicI64::new(0),
            finished: AtomicBool::new(false),
        }
    }

    async fn write(&self, state: TaskStatusState, error: Option<String>, message: Option<String>) {
        let update = StatusUpdate {
            trackable_type: self.trackable_type,
            trackable_id: self.trackable_id,
            operation: self.operation,
            state,
            current: self.current.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
            error,
            message,
        };

        for reporter in &self.reporters {
            reporter.report(&update);
        }
        if let Err(e) = self.store.upsert(&update).await {
            tracing::warn!(
                operation = %self.operation,
                error = %e,
                "failed to persist status update"
            );
        }
    }

    /// Record that the handler has picked up the task
    pub async fn started(&self) {
        self.write(TaskStatusState::Started, None, None).await;
    }

    pub async fn set_total(&self, total: i64) {
        self.total.store(total, Ordering::SeqCst);
        self.write(TaskStatusState::InProgress, None, None).await;
    }

    pub async fn set_current(&self, current: i64, message: impl Into<Option<String>>) {
        self.current.store(current, Ordering::SeqCst);
        self.write(TaskStatusState::InProgress, None, message.into())
            .await;
    }

    /// Record an empty-work no-op; replays must report skip, not
    /// complete, so the aggregator can tell them apart
    pub async fn skip(&self, reason: impl Into<String>) {
        self.finished.store(true, Ordering::SeqCst);
        self.write(TaskStatusState::Skipped, None, Some(reason.into()))
            .await;
    }

    pub async fn fail(&self, error: impl Into<String>) {
        self.finished.store(true, Ordering::SeqCst);
        self.write(TaskStatusState::Failed, Some(error.into()), None)
            .await;
    }

    /// Mark completion unless the handler already recorded a terminal
    /// state (a skip stays a skip)
    pub async fn complete(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.write(TaskStatusState::Completed, None, None).await;
    }
}
