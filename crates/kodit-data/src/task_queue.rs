//! Durable priority task queue
//!
//! Tasks live in the `tasks` table. Dequeue claims the highest-priority
//! pending row (lowest id within a band) with an optimistic guarded
//! UPDATE, which is atomic on both dialects: a competing claimer that
//! blocks on the row lock re-evaluates `state = 'pending'` and gets zero
//! rows back, so no task is ever handed out twice. Failed tasks are
//! re-queued behind a `visible_after` backoff until the retry cap, then
//! kept as terminally failed rows for observability.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use sqlx::any::AnyRow;
use sqlx::Row;
use std::time::Duration;

use crate::error::{DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult};
use crate::models::{format_ts, Task, TaskOperation, TaskPayload, TaskState};
use crate::pool::DbPool;
use crate::traits::{TaskFilter, TaskQueue};

/// Retry schedule: `initial * backoff^(n-1)`, jittered by +/-20%
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial: Duration,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_secs(5),
            backoff: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the `n`-th retry (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.initial.as_secs_f64() * self.backoff.powi(retry.saturating_sub(1) as i32);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_secs_f64(base * jitter)
    }
}

const TASK_COLUMNS: &str =
    "id, operation, payload, priority, state, retry_count, last_error, visible_after, created_at";

fn row_task(row: &AnyRow) -> DatabaseResult<Task> {
    let corrupt = |message: String| {
        DatabaseError::corrupt_row(
            DatabaseOperation::Query {
                description: "map_task".to_string(),
            },
            message,
        )
    };

    let operation_raw: String = row.get("operation");
    let operation: TaskOperation = operation_raw.parse().map_err(corrupt)?;

    let payload_raw: String = row.get("payload");
    let payload: TaskPayload =
        serde_json::from_str(&payload_raw).map_err(|e| corrupt(format!("bad payload: {e}")))?;

    let state_raw: String = row.get("state");
    let state: TaskState = state_raw.parse().map_err(corrupt)?;

    let visible_after: Option<String> = row.try_get("visible_after").unwrap_or(None);
    let visible_after = visible_after
        .map(|raw| {
            crate::models::parse_ts(&raw).map_err(|e| corrupt(format!("bad visible_after: {e}")))
        })
        .transpose()?;

    let created_raw: String = row.get("created_at");
    let created_at =
        crate::models::parse_ts(&created_raw).map_err(|e| corrupt(format!("bad created_at: {e}")))?;

    Ok(Task {
        id: row.get("id"),
        operation,
        payload,
        priority: row.get("priority"),
        state,
        retry_count: row.get("retry_count"),
        last_error: row.try_get("last_error").unwrap_or(None),
        visible_after,
        created_at,
    })
}

/// SQL-backed durable task queue
#[derive(Clone)]
pub struct SqlTaskQueue {
    db: DbPool,
    policy: RetryPolicy,
}

impl SqlTaskQueue {
    pub const fn new(db: DbPool, policy: RetryPolicy) -> Self {
        Self { db, policy }
    }
}

#[async_trait]
impl TaskQueue for SqlTaskQueue {
    async fn enqueue(
        &self,
        operation: TaskOperation,
        payload: &TaskPayload,
        priority: i64,
    ) -> DatabaseResult<()> {
        let op = DatabaseOperation::EnqueueTask {
            operation: operation.to_string(),
        };
        let payload_json = serde_json::to_string(payload).map_err(|e| {
            DatabaseError::corrupt_row(op.clone(), format!("unserialisable payload: {e}"))
        })?;

        sqlx::query(
            "INSERT INTO tasks (operation, payload, repository_id, priority, state, created_at) \
             VALUES ($1, $2, $3, $4, 'pending', $5)",
        )
        .bind(operation.as_str())
        .bind(payload_json)
        .bind(payload.repository_id)
        .bind(priority)
        .bind(format_ts(Utc::now()))
        .execute(self.db.inner())
        .await
        .map_db_err(op)?;

        tracing::debug!(
            operation = %operation,
            repository_id = payload.repository_id,
            priority,
            "task enqueued"
        );
        Ok(())
    }

    async fn enqueue_operations(
        &self,
        operations: &[TaskOperation],
        base_priority: i64,
        payload: &TaskPayload,
    ) -> DatabaseResult<()> {
        // Strictly decreasing offsets keep chain order within a band
        for (index, operation) in operations.iter().enumerate() {
            self.enqueue(*operation, payload, base_priority - index as i64)
                .await?;
        }
        Ok(())
    }

    async fn dequeue(&self) -> DatabaseResult<Option<Task>> {
        let now = format_ts(Utc::now());

        let row = sqlx::query(&format!(
            "UPDATE tasks SET state = 'started' \
             WHERE id = ( \
                 SELECT id FROM tasks \
                 WHERE state = 'pending' \
                   AND (visible_after IS NULL OR visible_after <= $1) \
                 ORDER BY priority DESC, id ASC \
                 LIMIT 1 \
             ) AND state = 'pending' \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(&now)
        .fetch_optional(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::DequeueTask)?;

        row.map(|r| row_task(&r)).transpose()
    }

    async fn complete(&self, task: &Task) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task.id)
            .execute(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::CompleteTask { id: task.id })?;
        Ok(())
    }

    async fn fail(&self, task: &Task, error: &str) -> DatabaseResult<bool> {
        let new_count = task.retry_count + 1;
        let retried = new_count <= i64::from(self.policy.max_retries);

        let visible_after = retried.then(|| {
            let delay = self.policy.delay_for(new_count as u32);
            format_ts(Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64))
        });
        let new_state = if retried {
            TaskState::Pending
        } else {
            TaskState::Failed
        };

        sqlx::query(
            "UPDATE tasks SET state = $1, retry_count = $2, last_error = $3, visible_after = $4 \
             WHERE id = $5",
        )
        .bind(new_state.to_string())
        .bind(new_count)
        .bind(error)
        .bind(visible_after)
        .bind(task.id)
        .execute(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::FailTask { id: task.id })?;

        if retried {
            tracing::warn!(
                task_id = task.id,
                operation = %task.operation,
                retry = new_count,
                "task failed, re-queued for retry"
            );
        } else {
            tracing::error!(
                task_id = task.id,
                operation = %task.operation,
                error,
                "task failed terminally after retry cap"
            );
        }
        Ok(retried)
    }

    async fn fail_permanently(&self, task: &Task, error: &str) -> DatabaseResult<()> {
        sqlx::query(
            "UPDATE tasks SET state = 'failed', last_error = $1, visible_after = NULL \
             WHERE id = $2",
        )
        .bind(error)
        .bind(task.id)
        .execute(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::FailTask { id: task.id })?;

        tracing::error!(
            task_id = task.id,
            operation = %task.operation,
            error,
            "task failed terminally (non-retryable)"
        );
        Ok(())
    }

    async fn list(&self, filter: &TaskFilter) -> DatabaseResult<Vec<Task>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1 = 1");
        let mut next_param = 1;

        if filter.repository_id.is_some() {
            sql.push_str(&format!(" AND repository_id = ${next_param}"));
            next_param += 1;
        }
        if filter.state.is_some() {
            sql.push_str(&format!(" AND state = ${next_param}"));
            next_param += 1;
        }
        if filter.operation.is_some() {
            sql.push_str(&format!(" AND operation = ${next_param}"));
        }
        sql.push_str(" ORDER BY priority DESC, id ASC");

        // Bind order matches the placeholder order built above
        let mut query = sqlx::query(&sql);
        if let Some(repo_id) = filter.repository_id {
            query = query.bind(repo_id);
        }
        if let Some(state) = filter.state {
            query = query.bind(state.to_string());
        }
        if let Some(operation) = filter.operation {
            query = query.bind(operation.to_string());
        }

        let rows = query
            .fetch_all(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: "list_tasks".to_string(),
            })?;

        rows.iter().map(row_task).collect()
    }

    async fn pending_count(&self, repository_id: i64) -> DatabaseResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM tasks \
             WHERE repository_id = $1 AND state IN ('pending', 'started')",
        )
        .bind(repository_id)
        .fetch_one(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("pending_count(repo={repository_id})"),
        })?;
        Ok(row.get("n"))
    }

    async fn delete_for_repository(&self, repository_id: i64) -> DatabaseResult<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE repository_id = $1")
            .bind(repository_id)
            .execute(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: format!("delete_tasks(repo={repository_id})"),
            })?;
        Ok(result.rows_affected())
    }

    async fn recover_started(&self) -> DatabaseResult<u64> {
        let result = sqlx::query("UPDATE tasks SET state = 'pending' WHERE state = 'started'")
            .execute(self.db.inner())
            .await
            .map_db_err(DatabaseOperation::Query {
                description: "recover_started".to_string(),
            })?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            tracing::info!(recovered, "reset in-flight tasks from previous run");
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue() -> SqlTaskQueue {
        let db = DbPool::initialize("sqlite::memory:", 1).await.unwrap();
        SqlTaskQueue::new(
            db,
            RetryPolicy {
                max_retries: 3,
                initial: Duration::ZERO,
                backoff: 2.0,
            },
        )
    }

    #[tokio::test]
    async fn test_dequeue_orders_by_priority_then_id() {
        let q = queue().await;
        let payload = TaskPayload::for_repository(1);

        q.enqueue(TaskOperation::ScanCommit, &payload, 0).await.unwrap();
        q.enqueue(TaskOperation::CloneRepository, &payload, 10)
            .await
            .unwrap();
        q.enqueue(TaskOperation::SyncRepository, &payload, 10)
            .await
            .unwrap();

        // Highest priority first; FIFO within the band
        let first = q.dequeue().await.unwrap().unwrap();
        assert_eq!(first.operation, TaskOperation::CloneRepository);
        let second = q.dequeue().await.unwrap().unwrap();
        assert_eq!(second.operation, TaskOperation::SyncRepository);
        let third = q.dequeue().await.unwrap().unwrap();
        assert_eq!(third.operation, TaskOperation::ScanCommit);
        assert!(q.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chain_enqueue_preserves_order() {
        let q = queue().await;
        let payload = TaskPayload::for_commit(1, "abc".to_string());
        let chain = [
            TaskOperation::ScanCommit,
            TaskOperation::ExtractSnippetsForCommit,
            TaskOperation::CreateBm25IndexForCommit,
        ];

        q.enqueue_operations(&chain, 100, &payload).await.unwrap();

        for expected in chain {
            let task = q.dequeue().await.unwrap().unwrap();
            assert_eq!(task.operation, expected);
            assert_eq!(task.payload, payload);
            q.complete(&task).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_dequeued_task_is_invisible_to_others() {
        let q = queue().await;
        q.enqueue(
            TaskOperation::ScanCommit,
            &TaskPayload::for_repository(1),
            0,
        )
        .await
        .unwrap();

        let task = q.dequeue().await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Started);
        assert!(q.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_deletes_the_task() {
        let q = queue().await;
        q.enqueue(
            TaskOperation::ScanCommit,
            &TaskPayload::for_repository(1),
            0,
        )
        .await
        .unwrap();

        let task = q.dequeue().await.unwrap().unwrap();
        q.complete(&task).await.unwrap();

        let remaining = q.list(&TaskFilter::default()).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_fail_requeues_until_cap_then_marks_failed() {
        let q = queue().await;
        q.enqueue(
            TaskOperation::ScanCommit,
            &TaskPayload::for_repository(1),
            0,
        )
        .await
        .unwrap();

        // Three retries pass, the fourth failure is terminal
        for attempt in 1..=3 {
            let task = q.dequeue().await.unwrap().unwrap();
            let retried = q.fail(&task, "boom").await.unwrap();
            assert!(retried, "attempt {attempt} should re-queue");
        }
        let task = q.dequeue().await.unwrap().unwrap();
        assert_eq!(task.retry_count, 3);
        let retried = q.fail(&task, "boom").await.unwrap();
        assert!(!retried);

        let failed = q
            .list(&TaskFilter {
                state: Some(TaskState::Failed),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("boom"));
        assert!(q.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_permanently_skips_retry_budget() {
        let q = queue().await;
        q.enqueue(
            TaskOperation::ScanCommit,
            &TaskPayload::for_repository(1),
            0,
        )
        .await
        .unwrap();

        let task = q.dequeue().await.unwrap().unwrap();
        q.fail_permanently(&task, "no handler registered").await.unwrap();

        assert!(q.dequeue().await.unwrap().is_none());
        let failed = q
            .list(&TaskFilter {
                state: Some(TaskState::Failed),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_retry_backoff_defers_visibility() {
        let db = DbPool::initialize("sqlite::memory:", 1).await.unwrap();
        let q = SqlTaskQueue::new(
            db,
            RetryPolicy {
                max_retries: 3,
                initial: Duration::from_secs(3600),
                backoff: 2.0,
            },
        );
        q.enqueue(
            TaskOperation::ScanCommit,
            &TaskPayload::for_repository(1),
            0,
        )
        .await
        .unwrap();

        let task = q.dequeue().await.unwrap().unwrap();
        assert!(q.fail(&task, "transient").await.unwrap());

        // Re-queued but not yet visible
        assert!(q.dequeue().await.unwrap().is_none());
        let pending = q
            .list(&TaskFilter {
                state: Some(TaskState::Pending),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].visible_after.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_recover_started_resets_in_flight() {
        let q = queue().await;
        q.enqueue(
            TaskOperation::ScanCommit,
            &TaskPayload::for_repository(1),
            0,
        )
        .await
        .unwrap();

        let _claimed = q.dequeue().await.unwrap().unwrap();
        assert!(q.dequeue().await.unwrap().is_none());

        assert_eq!(q.recover_started().await.unwrap(), 1);
        assert!(q.dequeue().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pending_count_per_repository() {
        let q = queue().await;
        q.enqueue(
            TaskOperation::ScanCommit,
            &TaskPayload::for_repository(1),
            0,
        )
        .await
        .unwrap();
        q.enqueue(
            TaskOperation::ScanCommit,
            &TaskPayload::for_repository(2),
            0,
        )
        .await
        .unwrap();

        assert_eq!(q.pending_count(1).await.unwrap(), 1);
        assert_eq!(q.pending_count(2).await.unwrap(), 1);
        assert_eq!(q.pending_count(3).await.unwrap(), 0);

        // A claimed task still counts as pending work for its repository
        let task = q.dequeue().await.unwrap().unwrap();
        assert_eq!(q.pending_count(task.payload.repository_id).await.unwrap(), 1);
    }

    #[test]
    fn test_retry_delay_grows_with_jitter_bounds() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial: Duration::from_secs(10),
            backoff: 2.0,
        };

        for retry in 1..=3u32 {
            let base = 10.0 * 2.0f64.powi(retry as i32 - 1);
            let delay = policy.delay_for(retry).as_secs_f64();
            assert!(delay >= base * 0.8 - f64::EPSILON, "retry {retry}: {delay}");
            assert!(delay <= base * 1.2 + f64::EPSILON, "retry {retry}: {delay}");
        }
    }
}
