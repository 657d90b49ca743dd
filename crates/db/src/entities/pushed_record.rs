//! Pushed record entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Outcome stored on a pushed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
}

/// Delivery audit row. Unique on `(content_id, target_id)`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pushed_record")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub content_id: String,

    /// Chat id the content was posted to.
    pub target_id: String,

    /// Chat platform of the target.
    pub platform: String,

    #[sea_orm(nullable)]
    pub rule_id: Option<String>,

    #[sea_orm(nullable)]
    pub queue_item_id: Option<String>,

    #[sea_orm(nullable)]
    pub message_id: Option<String>,

    pub push_status: PushStatus,

    pub pushed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
