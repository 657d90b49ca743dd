//! Content queue item repository.

use std::sync::Arc;

use crate::entities::content_queue_item::{self, QueueItemStatus};
use crate::entities::ContentQueueItem;
use fanout_common::{AppError, AppResult};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, Iterable, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};

/// Filters for listing queue items. Unset fields do not constrain.
#[derive(Debug, Clone)]
pub struct QueueItemFilter {
    pub status: Option<QueueItemStatus>,
    pub content_id: Option<String>,
    pub rule_id: Option<String>,
    pub bot_chat_id: Option<String>,
    pub limit: u64,
    pub offset: u64,
}

impl Default for QueueItemFilter {
    fn default() -> Self {
        Self {
            status: None,
            content_id: None,
            rule_id: None,
            bot_chat_id: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl QueueItemFilter {
    fn condition(&self) -> Condition {
        let mut cond = Condition::all();
        if let Some(status) = self.status {
            cond = cond.add(content_queue_item::Column::Status.eq(status));
        }
        if let Some(content_id) = &self.content_id {
            cond = cond.add(content_queue_item::Column::ContentId.eq(content_id.as_str()));
        }
        if let Some(rule_id) = &self.rule_id {
            cond = cond.add(content_queue_item::Column::RuleId.eq(rule_id.as_str()));
        }
        if let Some(bot_chat_id) = &self.bot_chat_id {
            cond = cond.add(content_queue_item::Column::BotChatId.eq(bot_chat_id.as_str()));
        }
        cond
    }
}

/// Content queue item repository for database operations.
#[derive(Clone)]
pub struct ContentQueueItemRepository {
    db: Arc<DatabaseConnection>,
}

impl ContentQueueItemRepository {
    /// Create a new queue item repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// The underlying connection, for the static helpers.
    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Find a queue item by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<content_queue_item::Model>> {
        ContentQueueItem::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a queue item by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<content_queue_item::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::QueueItemNotFound(id.to_string()))
    }

    /// List queue items in schedule order.
    pub async fn list(&self, filter: &QueueItemFilter) -> AppResult<Vec<content_queue_item::Model>> {
        ContentQueueItem::find()
            .filter(filter.condition())
            .order_by_asc(content_queue_item::Column::ScheduledAt)
            .order_by_asc(content_queue_item::Column::CreatedAt)
            .limit(filter.limit)
            .offset(filter.offset)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// FAILED items matching `filter`, oldest first.
    pub async fn find_failed(
        &self,
        filter: &QueueItemFilter,
        limit: u64,
    ) -> AppResult<Vec<content_queue_item::Model>> {
        ContentQueueItem::find()
            .filter(filter.condition())
            .filter(content_queue_item::Column::Status.eq(QueueItemStatus::Failed))
            .order_by_asc(content_queue_item::Column::UpdatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Number of items per status. Statuses without items are included with 0.
    pub async fn count_by_status(&self) -> AppResult<Vec<(QueueItemStatus, u64)>> {
        let mut counts = Vec::new();
        for status in QueueItemStatus::iter() {
            let count = ContentQueueItem::find()
                .filter(content_queue_item::Column::Status.eq(status))
                .count(self.db.as_ref())
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            counts.push((status, count));
        }
        Ok(counts)
    }

    /// All items of a content.
    pub async fn find_by_content<C: ConnectionTrait>(
        conn: &C,
        content_id: &str,
    ) -> AppResult<Vec<content_queue_item::Model>> {
        ContentQueueItem::find()
            .filter(content_queue_item::Column::ContentId.eq(content_id))
            .order_by_desc(content_queue_item::Column::Priority)
            .order_by_asc(content_queue_item::Column::CreatedAt)
            .all(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// PENDING and SCHEDULED items of one destination.
    pub async fn find_active_for_chat<C: ConnectionTrait>(
        conn: &C,
        bot_chat_id: &str,
    ) -> AppResult<Vec<content_queue_item::Model>> {
        ContentQueueItem::find()
            .filter(content_queue_item::Column::BotChatId.eq(bot_chat_id))
            .filter(content_queue_item::Column::Status.is_in(QueueItemStatus::ACTIVE))
            .order_by_asc(content_queue_item::Column::ScheduledAt)
            .order_by_asc(content_queue_item::Column::CreatedAt)
            .all(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Destinations that have at least one PENDING or SCHEDULED item.
    pub async fn find_active_chat_ids<C: ConnectionTrait>(conn: &C) -> AppResult<Vec<String>> {
        ContentQueueItem::find()
            .select_only()
            .column(content_queue_item::Column::BotChatId)
            .distinct()
            .filter(content_queue_item::Column::Status.is_in(QueueItemStatus::ACTIVE))
            .order_by_asc(content_queue_item::Column::BotChatId)
            .into_tuple::<String>()
            .all(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Time of the latest successful delivery to a destination.
    pub async fn last_delivery_at<C: ConnectionTrait>(
        conn: &C,
        bot_chat_id: &str,
    ) -> AppResult<Option<DateTimeWithTimeZone>> {
        let last = ContentQueueItem::find()
            .filter(content_queue_item::Column::BotChatId.eq(bot_chat_id))
            .filter(content_queue_item::Column::Status.eq(QueueItemStatus::Success))
            .order_by_desc(content_queue_item::Column::UpdatedAt)
            .one(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(last.and_then(|item| item.updated_at))
    }

    /// Insert an item unless its `(content, rule, chat)` triple exists.
    ///
    /// Returns `true` when a row was inserted.
    pub async fn insert_if_absent<C: ConnectionTrait>(
        conn: &C,
        model: content_queue_item::ActiveModel,
    ) -> AppResult<bool> {
        let rows = ContentQueueItem::insert(model)
            .on_conflict(
                OnConflict::columns([
                    content_queue_item::Column::ContentId,
                    content_queue_item::Column::RuleId,
                    content_queue_item::Column::BotChatId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows == 1)
    }

    /// Update an item on a caller-supplied connection.
    pub async fn update_on<C: ConnectionTrait>(
        conn: &C,
        model: content_queue_item::ActiveModel,
    ) -> AppResult<content_queue_item::Model> {
        model
            .update(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update an item.
    pub async fn update(
        &self,
        model: content_queue_item::ActiveModel,
    ) -> AppResult<content_queue_item::Model> {
        Self::update_on(self.db.as_ref(), model).await
    }

    /// Update an item only while `worker_id` holds its PROCESSING lock.
    ///
    /// Returns `None` when the lock was released or taken by another worker;
    /// nothing is written then.
    pub async fn update_locked(
        &self,
        model: content_queue_item::ActiveModel,
        worker_id: &str,
    ) -> AppResult<Option<content_queue_item::Model>> {
        match ContentQueueItem::update(model)
            .filter(content_queue_item::Column::Status.eq(QueueItemStatus::Processing))
            .filter(content_queue_item::Column::LockedBy.eq(worker_id))
            .exec(self.db.as_ref())
            .await
        {
            Ok(updated) => Ok(Some(updated)),
            Err(DbErr::RecordNotUpdated) => Ok(None),
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    /// Update an item only while it is in one of `from`.
    ///
    /// Returns `None` when the item moved to another status first.
    pub async fn update_from(
        &self,
        model: content_queue_item::ActiveModel,
        from: &[QueueItemStatus],
    ) -> AppResult<Option<content_queue_item::Model>> {
        match ContentQueueItem::update(model)
            .filter(content_queue_item::Column::Status.is_in(from.iter().copied()))
            .exec(self.db.as_ref())
            .await
        {
            Ok(updated) => Ok(Some(updated)),
            Err(DbErr::RecordNotUpdated) => Ok(None),
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    /// Due SCHEDULED items in ascending `scheduled_at`.
    pub async fn find_due(
        &self,
        now: DateTimeWithTimeZone,
        limit: u64,
    ) -> AppResult<Vec<content_queue_item::Model>> {
        ContentQueueItem::find()
            .filter(content_queue_item::Column::Status.eq(QueueItemStatus::Scheduled))
            .filter(content_queue_item::Column::ScheduledAt.lte(now))
            .filter(
                Condition::any()
                    .add(content_queue_item::Column::NextAttemptAt.is_null())
                    .add(content_queue_item::Column::NextAttemptAt.lte(now)),
            )
            .order_by_asc(content_queue_item::Column::ScheduledAt)
            .order_by_asc(content_queue_item::Column::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Move an item to PROCESSING if its status is one of `from`.
    ///
    /// Returns `false` when the item was claimed or changed by someone else.
    pub async fn try_claim(
        &self,
        id: &str,
        worker_id: &str,
        from: &[QueueItemStatus],
        now: DateTimeWithTimeZone,
    ) -> AppResult<bool> {
        let result = ContentQueueItem::update_many()
            .col_expr(
                content_queue_item::Column::Status,
                Expr::value(QueueItemStatus::Processing),
            )
            .col_expr(content_queue_item::Column::LockedAt, Expr::value(now))
            .col_expr(content_queue_item::Column::LockedBy, Expr::value(worker_id))
            .col_expr(content_queue_item::Column::UpdatedAt, Expr::value(now))
            .filter(content_queue_item::Column::Id.eq(id))
            .filter(content_queue_item::Column::Status.is_in(from.iter().copied()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    /// Return PROCESSING items locked before `cutoff` to SCHEDULED.
    pub async fn release_stale_locks(&self, cutoff: DateTimeWithTimeZone) -> AppResult<u64> {
        let result = ContentQueueItem::update_many()
            .col_expr(
                content_queue_item::Column::Status,
                Expr::value(QueueItemStatus::Scheduled),
            )
            .col_expr(
                content_queue_item::Column::LockedAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(
                content_queue_item::Column::LockedBy,
                Expr::value(Option::<String>::None),
            )
            .filter(content_queue_item::Column::Status.eq(QueueItemStatus::Processing))
            .filter(content_queue_item::Column::LockedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Other active items of the same content heading to the same destination.
    pub async fn find_active_siblings(
        &self,
        content_id: &str,
        bot_chat_id: &str,
        exclude_id: &str,
    ) -> AppResult<Vec<content_queue_item::Model>> {
        ContentQueueItem::find()
            .filter(content_queue_item::Column::ContentId.eq(content_id))
            .filter(content_queue_item::Column::BotChatId.eq(bot_chat_id))
            .filter(content_queue_item::Column::Id.ne(exclude_id))
            .filter(content_queue_item::Column::Status.is_in(QueueItemStatus::ACTIVE))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
