//! Content queue item entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Delivery state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    /// Waiting for approval.
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Waiting for its `scheduled_at`.
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    /// Claimed by a dispatcher.
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Another rule or an earlier delivery covers this destination.
    #[sea_orm(string_value = "skipped")]
    Skipped,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl QueueItemStatus {
    /// Statuses that still take part in scheduling.
    pub const ACTIVE: [Self; 2] = [Self::Pending, Self::Scheduled];

    /// Whether the item still occupies a slot in its destination queue.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }

    /// Stored value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Canceled => "canceled",
        }
    }
}

/// One delivery of a content to a destination under a rule.
///
/// Unique on `(content_id, rule_id, bot_chat_id)`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "content_queue_item")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub content_id: String,

    #[sea_orm(indexed)]
    pub rule_id: String,

    #[sea_orm(indexed)]
    pub bot_chat_id: String,

    /// Chat id actually posted to, after NSFW routing.
    pub target_chat_id: String,

    pub status: QueueItemStatus,

    /// Copied from the rule that created the item.
    pub priority: i32,

    #[sea_orm(nullable)]
    pub scheduled_at: Option<DateTimeWithTimeZone>,

    /// Pinned by an operator. Exempt from rule spacing.
    pub is_manual_schedule: bool,

    pub needs_approval: bool,

    #[sea_orm(nullable)]
    pub approved_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(default_value = 0)]
    pub attempt_count: i32,

    pub max_attempts: i32,

    #[sea_orm(nullable)]
    pub next_attempt_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub locked_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub locked_by: Option<String>,

    /// Delivery id returned by the renderer.
    #[sea_orm(nullable)]
    pub message_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    #[sea_orm(nullable)]
    pub last_error_type: Option<String>,

    #[sea_orm(nullable)]
    pub last_error_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::content::Entity",
        from = "Column::ContentId",
        to = "super::content::Column::Id",
        on_delete = "Cascade"
    )]
    Content,
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

impl Related<super::content::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Content.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
