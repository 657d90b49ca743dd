//! Pushed record repository.

use std::sync::Arc;

use crate::entities::{PushedRecord, pushed_record};
use fanout_common::{AppError, AppResult};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};

/// Pushed record repository for database operations.
#[derive(Clone)]
pub struct PushedRecordRepository {
    db: Arc<DatabaseConnection>,
}

impl PushedRecordRepository {
    /// Create a new pushed record repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The record for a `(content, target)` pair.
    pub async fn find(
        &self,
        content_id: &str,
        target_id: &str,
    ) -> AppResult<Option<pushed_record::Model>> {
        Self::find_on(self.db.as_ref(), content_id, target_id).await
    }

    /// [`Self::find`] on a caller-supplied connection.
    pub async fn find_on<C: ConnectionTrait>(
        conn: &C,
        content_id: &str,
        target_id: &str,
    ) -> AppResult<Option<pushed_record::Model>> {
        PushedRecord::find()
            .filter(pushed_record::Column::ContentId.eq(content_id))
            .filter(pushed_record::Column::TargetId.eq(target_id))
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// All records of a content.
    pub async fn find_by_content(&self, content_id: &str) -> AppResult<Vec<pushed_record::Model>> {
        PushedRecord::find()
            .filter(pushed_record::Column::ContentId.eq(content_id))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert a record, or refresh the existing one for the same pair.
    pub async fn upsert(&self, model: pushed_record::ActiveModel) -> AppResult<()> {
        PushedRecord::insert(model)
            .on_conflict(
                OnConflict::columns([
                    pushed_record::Column::ContentId,
                    pushed_record::Column::TargetId,
                ])
                .update_columns([
                    pushed_record::Column::MessageId,
                    pushed_record::Column::PushStatus,
                    pushed_record::Column::PushedAt,
                    pushed_record::Column::RuleId,
                    pushed_record::Column::QueueItemId,
                ])
                .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::pushed_record::PushStatus;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_find() {
        let record = pushed_record::Model {
            id: "p1".to_string(),
            content_id: "c1".to_string(),
            target_id: "-1001".to_string(),
            platform: "telegram".to_string(),
            rule_id: Some("r1".to_string()),
            queue_item_id: Some("q1".to_string()),
            message_id: Some("42".to_string()),
            push_status: PushStatus::Success,
            pushed_at: Utc::now().into(),
        };
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[record]])
                .into_connection(),
        );

        let repo = PushedRecordRepository::new(db);
        let found = repo.find("c1", "-1001").await.unwrap().unwrap();
        assert_eq!(found.message_id.as_deref(), Some("42"));
    }
}
