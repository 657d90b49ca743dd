//! Distribution rule repository.

use std::sync::Arc;

use crate::entities::{DistributionRule, distribution_rule};
use fanout_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

/// Distribution rule repository for database operations.
#[derive(Clone)]
pub struct DistributionRuleRepository {
    db: Arc<DatabaseConnection>,
}

impl DistributionRuleRepository {
    /// Create a new distribution rule repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a rule by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<distribution_rule::Model>> {
        DistributionRule::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a rule by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<distribution_rule::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::RuleNotFound(id.to_string()))
    }

    /// Enabled rules, highest priority first.
    ///
    /// Ties are broken by creation order so evaluation is deterministic.
    pub async fn find_enabled(&self) -> AppResult<Vec<distribution_rule::Model>> {
        DistributionRule::find()
            .filter(distribution_rule::Column::Enabled.eq(true))
            .order_by_desc(distribution_rule::Column::Priority)
            .order_by_asc(distribution_rule::Column::CreatedAt)
            .order_by_asc(distribution_rule::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new rule.
    pub async fn create(
        &self,
        model: distribution_rule::ActiveModel,
    ) -> AppResult<distribution_rule::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update a rule.
    pub async fn update(
        &self,
        model: distribution_rule::ActiveModel,
    ) -> AppResult<distribution_rule::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
