//! Create `pushed_record` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PushedRecord::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PushedRecord::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PushedRecord::ContentId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PushedRecord::TargetId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PushedRecord::Platform).string_len(32).not_null())
                    .col(ColumnDef::new(PushedRecord::RuleId).string_len(32))
                    .col(ColumnDef::new(PushedRecord::QueueItemId).string_len(32))
                    .col(ColumnDef::new(PushedRecord::MessageId).string_len(128))
                    .col(
                        ColumnDef::new(PushedRecord::PushStatus)
                            .string_len(16)
                            .not_null()
                            .default("success"),
                    )
                    .col(
                        ColumnDef::new(PushedRecord::PushedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Delivery dedup key
        manager
            .create_index(
                Index::create()
                    .name("idx_pushed_record_content_target")
                    .table(PushedRecord::Table)
                    .col(PushedRecord::ContentId)
                    .col(PushedRecord::TargetId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PushedRecord::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum PushedRecord {
    Table,
    Id,
    ContentId,
    TargetId,
    Platform,
    RuleId,
    QueueItemId,
    MessageId,
    PushStatus,
    PushedAt,
}
