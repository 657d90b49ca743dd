//! Bot chat (destination) entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An external chat or channel a bot can post to.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bot_chat")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Chat platform (`telegram`, `qq`).
    pub platform: String,

    /// Chat id on the platform. Unique together with `platform`.
    pub chat_id: String,

    #[sea_orm(nullable)]
    pub title: Option<String>,

    pub enabled: bool,

    /// Whether the bot can still see the chat.
    pub is_accessible: bool,

    /// Whether the bot has permission to post.
    pub can_post: bool,

    /// Alternate chat id for NSFW content.
    #[sea_orm(nullable)]
    pub nsfw_chat_id: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Whether the chat can receive deliveries right now.
    #[must_use]
    pub const fn is_deliverable(&self) -> bool {
        self.enabled && self.is_accessible && self.can_post
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::distribution_target::Entity")]
    Targets,
}

impl Related<super::distribution_target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Targets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
