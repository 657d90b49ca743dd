//! Distribution target entity (rule to bot chat join).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Binds a rule to a destination chat.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "distribution_target")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub rule_id: String,

    #[sea_orm(indexed)]
    pub bot_chat_id: String,

    pub enabled: bool,

    /// Batch due contents into one forwarded message.
    pub merge_forward: bool,

    /// Per-target render overrides passed through to the renderer.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub render_config: Option<Json>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::distribution_rule::Entity",
        from = "Column::RuleId",
        to = "super::distribution_rule::Column::Id",
        on_delete = "Cascade"
    )]
    Rule,
    #[sea_orm(
        belongs_to = "super::bot_chat::Entity",
        from = "Column::BotChatId",
        to = "super::bot_chat::Column::Id",
        on_delete = "Cascade"
    )]
    BotChat,
}

impl Related<super::distribution_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rule.def()
    }
}

impl Related<super::bot_chat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BotChat.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
