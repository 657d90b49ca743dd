//! Distribution target repository.

use std::sync::Arc;

use crate::entities::{BotChat, DistributionTarget, bot_chat, distribution_target};
use fanout_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

/// Distribution target repository for database operations.
#[derive(Clone)]
pub struct DistributionTargetRepository {
    db: Arc<DatabaseConnection>,
}

impl DistributionTargetRepository {
    /// Create a new distribution target repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a target by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<distribution_target::Model>> {
        DistributionTarget::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the target binding a rule to a chat.
    pub async fn find_by_rule_and_chat(
        &self,
        rule_id: &str,
        bot_chat_id: &str,
    ) -> AppResult<Option<distribution_target::Model>> {
        DistributionTarget::find()
            .filter(distribution_target::Column::RuleId.eq(rule_id))
            .filter(distribution_target::Column::BotChatId.eq(bot_chat_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Enabled targets of the given rules joined with their deliverable chats.
    ///
    /// One query for all rules. Targets whose chat is disabled, inaccessible
    /// or read-only are left out.
    pub async fn find_enabled_with_chats(
        &self,
        rule_ids: &[String],
    ) -> AppResult<Vec<(distribution_target::Model, bot_chat::Model)>> {
        if rule_ids.is_empty() {
            return Ok(vec![]);
        }

        let rows = DistributionTarget::find()
            .find_also_related(BotChat)
            .filter(distribution_target::Column::RuleId.is_in(rule_ids.iter().cloned()))
            .filter(distribution_target::Column::Enabled.eq(true))
            .filter(bot_chat::Column::Enabled.eq(true))
            .filter(bot_chat::Column::IsAccessible.eq(true))
            .filter(bot_chat::Column::CanPost.eq(true))
            .order_by_asc(distribution_target::Column::CreatedAt)
            .order_by_asc(distribution_target::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|(target, chat)| chat.map(|chat| (target, chat)))
            .collect())
    }

    /// Create a new target.
    pub async fn create(
        &self,
        model: distribution_target::ActiveModel,
    ) -> AppResult<distribution_target::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update a target.
    pub async fn update(
        &self,
        model: distribution_target::ActiveModel,
    ) -> AppResult<distribution_target::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
