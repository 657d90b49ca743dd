//! Content entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Parse lifecycle of a content record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    /// Created, not parsed yet.
    #[sea_orm(string_value = "unprocessed")]
    Unprocessed,
    /// A worker is parsing it.
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "parse_success")]
    ParseSuccess,
    #[sea_orm(string_value = "parse_failed")]
    ParseFailed,
    #[sea_orm(string_value = "archived")]
    Archived,
}

/// Review lifecycle of a content record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "auto_approved")]
    AutoApproved,
}

impl ReviewStatus {
    /// Whether this status lets content through an approval gate.
    #[must_use]
    pub const fn is_approved(self) -> bool {
        matches!(self, Self::Approved | Self::AutoApproved)
    }
}

/// A canonical record for one shared URL.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "content")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Platform name (e.g. `bilibili`, `twitter`, `universal`).
    pub platform: String,

    /// URL as it was shared.
    #[sea_orm(column_type = "Text")]
    pub url: String,

    /// Canonical URL, unique together with `platform`.
    #[sea_orm(column_type = "Text")]
    pub canonical_url: String,

    pub status: ContentStatus,

    pub review_status: ReviewStatus,

    /// Tags (JSON array of strings).
    #[sea_orm(column_type = "JsonBinary")]
    pub tags: Json,

    pub is_nsfw: bool,

    /// Where the share came from (bot command, api, import).
    #[sea_orm(nullable)]
    pub source: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub body: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub cover_url: Option<String>,

    /// Media URLs (JSON array of strings).
    #[sea_orm(column_type = "JsonBinary")]
    pub media_urls: Json,

    #[sea_orm(nullable)]
    pub author_name: Option<String>,

    #[sea_orm(nullable)]
    pub author_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub author_url: Option<String>,

    /// Platform statistics (JSON object, opaque to the pipeline).
    #[sea_orm(column_type = "JsonBinary")]
    pub stats: Json,

    /// Number of failed parse attempts.
    #[sea_orm(default_value = 0)]
    pub failure_count: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    /// Machine-readable classification of `last_error`.
    #[sea_orm(nullable)]
    pub last_error_type: Option<String>,

    #[sea_orm(nullable)]
    pub last_error_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub reviewed_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub reviewed_by: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub review_note: Option<String>,

    /// When the post was published on its platform.
    #[sea_orm(nullable)]
    pub published_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Tags as a list of strings.
    #[must_use]
    pub fn tag_list(&self) -> Vec<String> {
        serde_json::from_value(self.tags.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::content_queue_item::Entity")]
    QueueItems,
}

impl Related<super::content_queue_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QueueItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
