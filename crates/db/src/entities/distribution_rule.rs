//! Distribution rule entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// What a rule does with NSFW content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
#[serde(rename_all = "snake_case")]
pub enum NsfwPolicy {
    /// Never deliver NSFW content.
    #[sea_orm(string_value = "block")]
    Block,
    /// Deliver NSFW content to the normal chat.
    #[sea_orm(string_value = "allow")]
    Allow,
    /// Deliver NSFW content to the chat's NSFW alternate only.
    #[sea_orm(string_value = "separate_channel")]
    SeparateChannel,
}

/// How required tags are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagsMode {
    /// At least one required tag must be present.
    #[default]
    Any,
    /// Every required tag must be present.
    All,
}

/// Content filter stored as JSON on a rule.
///
/// Absent fields do not constrain. Tag comparison is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConditions {
    pub platform: Option<String>,
    pub tags: Vec<String>,
    pub tags_mode: TagsMode,
    pub tags_exclude: Vec<String>,
    pub is_nsfw: Option<bool>,
}

/// A named, priority-ordered filter and delivery policy.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "distribution_rule")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(unique)]
    pub name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    /// [`MatchConditions`] as JSON.
    #[sea_orm(column_type = "JsonBinary")]
    pub match_conditions: Json,

    pub nsfw_policy: NsfwPolicy,

    /// Hold matched content until it is approved.
    pub approval_required: bool,

    /// [`MatchConditions`] for the auto-approval pass.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub auto_approve_conditions: Option<Json>,

    /// Deliveries allowed per destination per `time_window`.
    #[sea_orm(nullable)]
    pub rate_limit: Option<i32>,

    /// Rate limit window in seconds.
    #[sea_orm(nullable)]
    pub time_window: Option<i32>,

    /// Higher priority rules claim a destination first.
    pub priority: i32,

    pub enabled: bool,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Decode the match conditions.
    pub fn conditions(&self) -> Result<MatchConditions, serde_json::Error> {
        serde_json::from_value(self.match_conditions.clone())
    }

    /// Decode the auto-approval conditions, if the rule has any.
    pub fn auto_approve(&self) -> Result<Option<MatchConditions>, serde_json::Error> {
        self.auto_approve_conditions
            .clone()
            .map(serde_json::from_value)
            .transpose()
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conditions_defaults() {
        let conditions: MatchConditions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(conditions, MatchConditions::default());
        assert_eq!(conditions.tags_mode, TagsMode::Any);
    }

    #[test]
    fn test_conditions_full() {
        let conditions: MatchConditions = serde_json::from_value(json!({
            "platform": "bilibili",
            "tags": ["tech"],
            "tags_mode": "all",
            "tags_exclude": ["ad"],
            "is_nsfw": false
        }))
        .unwrap();
        assert_eq!(conditions.platform.as_deref(), Some("bilibili"));
        assert_eq!(conditions.tags_mode, TagsMode::All);
        assert_eq!(conditions.is_nsfw, Some(false));
    }

    #[test]
    fn test_conditions_reject_unknown_shape() {
        assert!(serde_json::from_value::<MatchConditions>(json!({"tag": "x"})).is_err());
        assert!(serde_json::from_value::<MatchConditions>(json!({"tags_mode": "some"})).is_err());
    }
}
