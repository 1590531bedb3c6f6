//! Repository status aggregation
//!
//! Derives the single user-visible repository state from the fan-out of
//! per-operation task statuses plus the repository's pending queue
//! count. Skipped counts as success throughout: a replayed no-op must
//! not drag a finished repository back to pending.

use chrono::{DateTime, Utc};

use kodit_data::models::{RepositoryStatusSummary, SummaryStatus, TaskStatus, TaskStatusState};

/// Compute the summary for one repository
///
/// Precedence, first match wins:
/// 1. any running task -> in_progress
/// 2. pending queue work -> in_progress
/// 3. terminal states: failures vs successes (completed + skipped)
/// 4. nothing recorded -> pending
pub fn summarize_repository_status(
    statuses: &[TaskStatus],
    pending_count: i64,
    now: DateTime<Utc>,
) -> RepositoryStatusSummary {
    let running = statuses
        .iter()
        .filter(|s| {
            matches!(
                s.state,
                TaskStatusState::InProgress | TaskStatusState::Started
            )
        })
        .max_by_key(|s| s.updated_at);
    if let Some(task) = running {
        return RepositoryStatusSummary {
            status: SummaryStatus::InProgress,
            message: task.message.clone(),
            updated_at: task.updated_at,
        };
    }

    if pending_count > 0 {
        return RepositoryStatusSummary {
            status: SummaryStatus::InProgress,
            message: None,
            updated_at: now,
        };
    }

    let successes = statuses
        .iter()
        .filter(|s| {
            matches!(
                s.state,
                TaskStatusState::Completed | TaskStatusState::Skipped
            )
        })
        .count();
    let most_recent_failure = statuses
        .iter()
        .filter(|s| s.state == TaskStatusState::Failed)
        .max_by_key(|s| s.updated_at);
    let failures = statuses
        .iter()
        .filter(|s| s.state == TaskStatusState::Failed)
        .count();

    if let Some(failed) = most_recent_failure {
        let status = if successes > failures {
            SummaryStatus::CompletedWithErrors
        } else {
            // Ties go to failed
            SummaryStatus::Failed
        };
        return RepositoryStatusSummary {
            status,
            message: failed.error.clone(),
            updated_at: failed.updated_at,
        };
    }

    if let Some(success) = statuses
        .iter()
        .filter(|s| {
            matches!(
                s.state,
                TaskStatusState::Completed | TaskStatusState::Skipped
            )
        })
        .max_by_key(|s| s.updated_at)
    {
        return RepositoryStatusSummary {
            status: SummaryStatus::Completed,
            message: None,
            updated_at: success.updated_at,
        };
    }

    RepositoryStatusSummary {
        status: SummaryStatus::Pending,
        message: None,
        updated_at: now,
    }
}
