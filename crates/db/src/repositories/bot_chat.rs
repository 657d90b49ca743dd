//! Bot chat repository.

use std::sync::Arc;

use crate::entities::{BotChat, bot_chat};
use fanout_common::{AppError, AppResult};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait};

/// Bot chat repository for database operations.
#[derive(Clone)]
pub struct BotChatRepository {
    db: Arc<DatabaseConnection>,
}

impl BotChatRepository {
    /// Create a new bot chat repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a chat by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<bot_chat::Model>> {
        BotChat::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a chat by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<bot_chat::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Bot chat {id} not found")))
    }

    /// Create a new chat.
    pub async fn create(&self, model: bot_chat::ActiveModel) -> AppResult<bot_chat::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update a chat.
    pub async fn update(&self, model: bot_chat::ActiveModel) -> AppResult<bot_chat::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
