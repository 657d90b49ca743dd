//! Task repository.

use std::sync::Arc;

use crate::entities::task::{self, DeadLetterReason, TaskStatus};
use crate::entities::Task;
use fanout_common::{AppError, AppResult};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, Iterable,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};

/// Task repository for database operations.
#[derive(Clone)]
pub struct TaskRepository {
    db: Arc<DatabaseConnection>,
}

impl TaskRepository {
    /// Create a new task repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a task by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<task::Model>> {
        Task::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a task by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<task::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {id} not found")))
    }

    /// Create a new task.
    pub async fn create(&self, model: task::ActiveModel) -> AppResult<task::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// The next PENDING task by `(priority desc, created_at asc)`.
    pub async fn find_next_pending(&self) -> AppResult<Option<task::Model>> {
        Task::find()
            .filter(task::Column::Status.eq(TaskStatus::Pending))
            .order_by_desc(task::Column::Priority)
            .order_by_asc(task::Column::CreatedAt)
            .order_by_asc(task::Column::Id)
            .limit(1)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Move a task from PENDING to RUNNING.
    ///
    /// Returns `false` when another worker claimed it first.
    pub async fn try_claim(
        &self,
        id: &str,
        worker_id: &str,
        now: DateTimeWithTimeZone,
    ) -> AppResult<bool> {
        let result = Task::update_many()
            .col_expr(task::Column::Status, Expr::value(TaskStatus::Running))
            .col_expr(task::Column::WorkerId, Expr::value(worker_id))
            .col_expr(task::Column::StartedAt, Expr::value(now))
            .col_expr(task::Column::UpdatedAt, Expr::value(now))
            .filter(task::Column::Id.eq(id))
            .filter(task::Column::Status.eq(TaskStatus::Pending))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    /// Mark a task COMPLETED.
    ///
    /// Applies only while `worker_id` still runs the task. Returns `false`
    /// when the claim was lost to recovery or another worker.
    pub async fn mark_completed(
        &self,
        id: &str,
        worker_id: &str,
        now: DateTimeWithTimeZone,
    ) -> AppResult<bool> {
        let result = Task::update_many()
            .col_expr(task::Column::Status, Expr::value(TaskStatus::Completed))
            .col_expr(task::Column::CompletedAt, Expr::value(now))
            .col_expr(task::Column::UpdatedAt, Expr::value(now))
            .filter(owned_by(id, worker_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected == 1)
    }

    /// Rewrite a task into the dead-letter state.
    ///
    /// Applies only while `worker_id` still runs the task.
    pub async fn mark_dead_letter(
        &self,
        id: &str,
        worker_id: &str,
        reason: DeadLetterReason,
        error: &str,
        retry_count: i32,
        now: DateTimeWithTimeZone,
    ) -> AppResult<bool> {
        let result = Task::update_many()
            .col_expr(task::Column::Status, Expr::value(TaskStatus::Failed))
            .col_expr(task::Column::FailureReason, Expr::value(reason))
            .col_expr(task::Column::LastError, Expr::value(error))
            .col_expr(task::Column::RetryCount, Expr::value(retry_count))
            .col_expr(task::Column::CompletedAt, Expr::value(now))
            .col_expr(task::Column::UpdatedAt, Expr::value(now))
            .filter(owned_by(id, worker_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected == 1)
    }

    /// Record a failed attempt on a task that will be retried.
    ///
    /// Applies only while `worker_id` still runs the task.
    pub async fn record_attempt(
        &self,
        id: &str,
        worker_id: &str,
        retry_count: i32,
        error: &str,
        now: DateTimeWithTimeZone,
    ) -> AppResult<bool> {
        let result = Task::update_many()
            .col_expr(task::Column::RetryCount, Expr::value(retry_count))
            .col_expr(task::Column::LastError, Expr::value(error))
            .col_expr(task::Column::UpdatedAt, Expr::value(now))
            .filter(owned_by(id, worker_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected == 1)
    }

    /// Return RUNNING tasks started before `cutoff` to PENDING.
    pub async fn recover_stuck(&self, cutoff: DateTimeWithTimeZone) -> AppResult<u64> {
        let result = Task::update_many()
            .col_expr(task::Column::Status, Expr::value(TaskStatus::Pending))
            .col_expr(task::Column::WorkerId, Expr::value(Option::<String>::None))
            .col_expr(
                task::Column::StartedAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .filter(task::Column::Status.eq(TaskStatus::Running))
            .filter(task::Column::StartedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Delete COMPLETED tasks finished before `cutoff`.
    pub async fn purge_completed(&self, cutoff: DateTimeWithTimeZone) -> AppResult<u64> {
        let result = Task::delete_many()
            .filter(task::Column::Status.eq(TaskStatus::Completed))
            .filter(task::Column::CompletedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Dead-lettered tasks, newest first.
    pub async fn find_dead_letters(&self, limit: u64) -> AppResult<Vec<task::Model>> {
        Task::find()
            .filter(task::Column::Status.eq(TaskStatus::Failed))
            .order_by_desc(task::Column::CompletedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Number of tasks per status.
    pub async fn count_by_status(&self) -> AppResult<Vec<(TaskStatus, u64)>> {
        let mut counts = Vec::new();
        for status in TaskStatus::iter() {
            let count = Task::find()
                .filter(task::Column::Status.eq(status))
                .count(self.db.as_ref())
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            counts.push((status, count));
        }
        Ok(counts)
    }
}

/// RUNNING task `id` claimed by `worker_id`.
fn owned_by(id: &str, worker_id: &str) -> Condition {
    Condition::all()
        .add(task::Column::Id.eq(id))
        .add(task::Column::Status.eq(TaskStatus::Running))
        .add(task::Column::WorkerId.eq(worker_id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use serde_json::json;

    fn create_test_task(id: &str, priority: i32) -> task::Model {
        task::Model {
            id: id.to_string(),
            task_type: "parse".to_string(),
            payload: json!({"action": "parse", "content_id": "c1"}),
            status: TaskStatus::Pending,
            priority,
            retry_count: 0,
            max_retries: 3,
            last_error: None,
            failure_reason: None,
            worker_id: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_next_pending() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_task("t1", 5)]])
                .into_connection(),
        );

        let repo = TaskRepository::new(db);
        let next = repo.find_next_pending().await.unwrap().unwrap();
        assert_eq!(next.id, "t1");
        assert_eq!(next.priority, 5);
    }

    #[tokio::test]
    async fn test_try_claim_only_once() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                ])
                .into_connection(),
        );

        let repo = TaskRepository::new(db);
        let now = Utc::now().into();
        assert!(repo.try_claim("t1", "w1", now).await.unwrap());
        assert!(!repo.try_claim("t1", "w2", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_completed() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 4,
                }])
                .into_connection(),
        );

        let repo = TaskRepository::new(db);
        let purged = repo.purge_completed(Utc::now().into()).await.unwrap();
        assert_eq!(purged, 4);
    }
}
