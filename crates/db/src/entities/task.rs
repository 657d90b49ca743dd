//! Durable task entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Dead-lettered. See `failure_reason`.
    #[sea_orm(string_value = "failed")]
    Failed,
}

/// Why a task was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    #[sea_orm(string_value = "auth_required")]
    AuthRequired,
    #[sea_orm(string_value = "non_retryable")]
    NonRetryable,
    #[sea_orm(string_value = "max_attempts_reached")]
    MaxAttemptsReached,
}

impl DeadLetterReason {
    /// Machine-readable code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthRequired => "auth_required",
            Self::NonRetryable => "non_retryable",
            Self::MaxAttemptsReached => "max_attempts_reached",
        }
    }
}

/// A generic queued unit of work with an opaque JSON payload.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "task")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Payload discriminator, mirrors the payload's `action`.
    pub task_type: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Json,

    pub status: TaskStatus,

    /// Higher runs first.
    pub priority: i32,

    #[sea_orm(default_value = 0)]
    pub retry_count: i32,

    pub max_retries: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    #[sea_orm(nullable)]
    pub failure_reason: Option<DeadLetterReason>,

    /// Worker currently holding the task.
    #[sea_orm(nullable)]
    pub worker_id: Option<String>,

    #[sea_orm(nullable)]
    pub started_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub completed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
