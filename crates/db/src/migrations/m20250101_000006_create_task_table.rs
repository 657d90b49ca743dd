//! Create `task` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Task::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Task::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Task::TaskType).string_len(32).not_null())
                    .col(ColumnDef::new(Task::Payload).json_binary().not_null())
                    .col(
                        ColumnDef::new(Task::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Task::Priority).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Task::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Task::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(ColumnDef::new(Task::LastError).text())
                    .col(ColumnDef::new(Task::FailureReason).string_len(32))
                    .col(ColumnDef::new(Task::WorkerId).string_len(64))
                    .col(ColumnDef::new(Task::StartedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Task::CompletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Task::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Task::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Dequeue order
        manager
            .create_index(
                Index::create()
                    .name("idx_task_status_priority_created_at")
                    .table(Task::Table)
                    .col(Task::Status)
                    .col(Task::Priority)
                    .col(Task::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_task_type_status")
                    .table(Task::Table)
                    .col(Task::TaskType)
                    .col(Task::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Task::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Task {
    Table,
    Id,
    TaskType,
    Payload,
    Status,
    Priority,
    RetryCount,
    MaxRetries,
    LastError,
    FailureReason,
    WorkerId,
    StartedAt,
    CompletedAt,
    CreatedAt,
    UpdatedAt,
}
