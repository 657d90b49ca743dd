//! Content repository.

use std::sync::Arc;

use crate::entities::content::{self, ContentStatus};
use crate::entities::Content;
use chrono::Utc;
use fanout_common::{AppError, AppResult};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};

/// Content repository for database operations.
#[derive(Clone)]
pub struct ContentRepository {
    db: Arc<DatabaseConnection>,
}

impl ContentRepository {
    /// Create a new content repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find content by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<content::Model>> {
        Content::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get content by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<content::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::ContentNotFound(id.to_string()))
    }

    /// Find content by its unique `(platform, canonical_url)` key.
    pub async fn find_by_canonical_url(
        &self,
        platform: &str,
        canonical_url: &str,
    ) -> AppResult<Option<content::Model>> {
        Content::find()
            .filter(content::Column::Platform.eq(platform))
            .filter(content::Column::CanonicalUrl.eq(canonical_url))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Parsed, non-archived content, newest first.
    pub async fn find_recent_parsed(&self, limit: u64) -> AppResult<Vec<content::Model>> {
        Content::find()
            .filter(content::Column::Status.eq(ContentStatus::ParseSuccess))
            .order_by_desc(content::Column::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert content unless its `(platform, canonical_url)` pair exists.
    ///
    /// Returns `true` when a row was inserted.
    pub async fn insert_if_absent(&self, model: content::ActiveModel) -> AppResult<bool> {
        let rows = Content::insert(model)
            .on_conflict(
                OnConflict::columns([content::Column::Platform, content::Column::CanonicalUrl])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows == 1)
    }

    /// Update content.
    pub async fn update(&self, model: content::ActiveModel) -> AppResult<content::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update content on a caller-supplied connection.
    pub async fn update_on<C: ConnectionTrait>(
        conn: &C,
        model: content::ActiveModel,
    ) -> AppResult<content::Model> {
        model
            .update(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Move content to PROCESSING if it is in one of `from`.
    ///
    /// Returns `false` when another worker changed the status first.
    pub async fn try_mark_processing(&self, id: &str, from: &[ContentStatus]) -> AppResult<bool> {
        let result = Content::update_many()
            .col_expr(
                content::Column::Status,
                Expr::value(ContentStatus::Processing),
            )
            .col_expr(
                content::Column::UpdatedAt,
                Expr::value(DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(content::Column::Id.eq(id))
            .filter(content::Column::Status.is_in(from.iter().copied()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected == 1)
    }

    /// Record a parse failure and bump `failure_count`.
    pub async fn record_failure(
        &self,
        id: &str,
        status: ContentStatus,
        error: &str,
        error_type: &str,
    ) -> AppResult<()> {
        let now = DateTimeWithTimeZone::from(Utc::now());
        Content::update_many()
            .col_expr(content::Column::Status, Expr::value(status))
            .col_expr(
                content::Column::FailureCount,
                Expr::col(content::Column::FailureCount).add(1),
            )
            .col_expr(content::Column::LastError, Expr::value(error))
            .col_expr(content::Column::LastErrorType, Expr::value(error_type))
            .col_expr(content::Column::LastErrorAt, Expr::value(now))
            .col_expr(content::Column::UpdatedAt, Expr::value(now))
            .filter(content::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// Return contents left in PROCESSING since before `cutoff` to PARSE_FAILED.
    ///
    /// Frees contents whose parse task died with its worker, so the
    /// recovered task can claim them again.
    pub async fn release_stuck_processing(
        &self,
        cutoff: DateTimeWithTimeZone,
    ) -> AppResult<u64> {
        let now = DateTimeWithTimeZone::from(Utc::now());
        let result = Content::update_many()
            .col_expr(content::Column::Status, Expr::value(ContentStatus::ParseFailed))
            .col_expr(content::Column::LastError, Expr::value("parse interrupted"))
            .col_expr(content::Column::LastErrorType, Expr::value("interrupted"))
            .col_expr(content::Column::LastErrorAt, Expr::value(now))
            .col_expr(content::Column::UpdatedAt, Expr::value(now))
            .filter(content::Column::Status.eq(ContentStatus::Processing))
            .filter(content::Column::UpdatedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }
}
