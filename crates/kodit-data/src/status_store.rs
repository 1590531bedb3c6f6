//! Task status persistence
//!
//! One row per `(trackable, operation)` pair, updated in place when a
//! handler re-runs, so the table is the observable history of the most
//! recent execution of every operation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::error::{DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult};
use crate::models::{format_ts, parse_ts, TaskStatus, TrackableType};
use crate::pool::DbPool;
use crate::traits::{StatusUpdate, TaskStatusStore};

#[derive(Clone)]
pub struct SqlTaskStatusStore {
    db: DbPool,
}

impl SqlTaskStatusStore {
    pub const fn new(db: DbPool) -> Self {
        Self { db }
    }
}

fn row_status(row: &AnyRow) -> DatabaseResult<TaskStatus> {
    let corrupt = |message: String| {
        DatabaseError::corrupt_row(
            DatabaseOperation::Query {
                description: "map_task_status".to_string(),
            },
            message,
        )
    };

    let trackable_raw: String = row.get("trackable_type");
    let trackable_type = match trackable_raw.as_str() {
        "repository" => TrackableType::Repository,
        other => return Err(corrupt(format!("unknown trackable type: {other}"))),
    };

    let operation_raw: String = row.get("operation");
    let state_raw: String = row.get("state");
    let created_raw: String = row.get("created_at");
    let updated_raw: String = row.get("updated_at");

    Ok(TaskStatus {
        id: row.get("id"),
        trackable_type,
        trackable_id: row.get("trackable_id"),
        operation: operation_raw.parse().map_err(corrupt)?,
        state: state_raw.parse().map_err(corrupt)?,
        current: row.get("current_count"),
        total: row.get("total_count"),
        error: row.try_get("error").unwrap_or(None),
        message: row.try_get("message").unwrap_or(None),
        created_at: parse_ts(&created_raw).map_err(|e| corrupt(e.to_string()))?,
        updated_at: parse_ts(&updated_raw).map_err(|e| corrupt(e.to_string()))?,
    })
}

#[async_trait]
impl TaskStatusStore for SqlTaskStatusStore {
    async fn upsert(&self, update: &StatusUpdate) -> DatabaseResult<()> {
        let now = format_ts(Utc::now());

        sqlx::query(
            "INSERT INTO task_statuses \
                 (trackable_type, trackable_id, operation, state, current_count, total_count, \
                  error, message, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (trackable_type, trackable_id, operation) DO UPDATE SET \
                 state = excluded.state, \
                 current_count = excluded.current_count, \
                 total_count = excluded.total_count, \
                 error = excluded.error, \
                 message = excluded.message, \
                 updated_at = excluded.updated_at",
        )
        .bind(update.trackable_type.to_string())
        .bind(update.trackable_id)
        .bind(update.operation.as_str())
        .bind(update.state.to_string())
        .bind(update.current)
        .bind(update.total)
        .bind(update.error.as_deref())
        .bind(update.message.as_deref())
        .bind(&now)
        .bind(&now)
        .execute(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::UpsertStatus {
            operation: update.operation.to_string(),
        })?;
        Ok(())
    }

    async fn statuses_for(
        &self,
        trackable_type: TrackableType,
        trackable_id: i64,
    ) -> DatabaseResult<Vec<TaskStatus>> {
        let rows = sqlx::query(
            "SELECT id, trackable_type, trackable_id, operation, state, current_count, \
                    total_count, error, message, created_at, updated_at \
             FROM task_statuses \
             WHERE trackable_type = $1 AND trackable_id = $2 \
             ORDER BY updated_at",
        )
        .bind(trackable_type.to_string())
        .bind(trackable_id)
        .fetch_all(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("statuses_for({trackable_type}, {trackable_id})"),
        })?;

        rows.iter().map(row_status).collect()
    }

    async fn delete_for(
        &self,
        trackable_type: TrackableType,
        trackable_id: i64,
    ) -> DatabaseResult<u64> {
        let result = sqlx::query(
            "DELETE FROM task_statuses WHERE trackable_type = $1 AND trackable_id = $2",
        )
        .bind(trackable_type.to_string())
        .bind(trackable_id)
        .execute(self.db.inner())
        .await
        .map_db_err(DatabaseOperation::Query {
            description: format!("delete_statuses({trackable_type}, {trackable_id})"),
        })?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskOperation, TaskStatusState};

    async fn store() -> SqlTaskStatusStore {
        let db = DbPool::initialize("sqlite::memory:", 1).await.unwrap();
        SqlTaskStatusStore::new(db)
    }

    fn update(operation: TaskOperation, state: TaskStatusState) -> StatusUpdate {
        StatusUpdate {
            trackable_type: TrackableType::Repository,
            trackable_id: 1,
            operation,
            state,
            current: 0,
            total: 0,
            error: None,
            message: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_per_operation_row() {
        let s = store().await;

        s.upsert(&update(TaskOperation::ScanCommit, TaskStatusState::Started))
            .await
            .unwrap();
        s.upsert(&StatusUpdate {
            current: 5,
            total: 10,
            ..update(TaskOperation::ScanCommit, TaskStatusState::InProgress)
        })
        .await
        .unwrap();

        let statuses = s
            .statuses_for(TrackableType::Repository, 1)
            .await
            .unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, TaskStatusState::InProgress);
        assert_eq!(statuses[0].current, 5);
        assert_eq!(statuses[0].total, 10);
    }

    #[tokio::test]
    async fn test_one_row_per_operation() {
        let s = store().await;

        s.upsert(&update(TaskOperation::ScanCommit, TaskStatusState::Completed))
            .await
            .unwrap();
        s.upsert(&update(
            TaskOperation::ExtractSnippetsForCommit,
            TaskStatusState::Failed,
        ))
        .await
        .unwrap();

        let statuses = s
            .statuses_for(TrackableType::Repository, 1)
            .await
            .unwrap();
        assert_eq!(statuses.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_for_repository() {
        let s = store().await;
        s.upsert(&update(TaskOperation::ScanCommit, TaskStatusState::Completed))
            .await
            .unwrap();

        assert_eq!(
            s.delete_for(TrackableType::Repository, 1).await.unwrap(),
            1
        );
        assert!(s
            .statuses_for(TrackableType::Repository, 1)
            .await
            .unwrap()
            .is_empty());
    }
}
