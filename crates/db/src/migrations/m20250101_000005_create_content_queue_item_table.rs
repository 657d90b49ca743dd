//! Create `content_queue_item` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ContentQueueItem::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ContentQueueItem::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ContentQueueItem::ContentId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ContentQueueItem::RuleId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ContentQueueItem::BotChatId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ContentQueueItem::TargetChatId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ContentQueueItem::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(ContentQueueItem::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ContentQueueItem::ScheduledAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(ContentQueueItem::IsManualSchedule)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ContentQueueItem::NeedsApproval)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ContentQueueItem::ApprovedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(ContentQueueItem::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ContentQueueItem::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(ContentQueueItem::NextAttemptAt).timestamp_with_time_zone(),
                    )
                    .col(ColumnDef::new(ContentQueueItem::LockedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ContentQueueItem::LockedBy).string_len(64))
                    .col(ColumnDef::new(ContentQueueItem::MessageId).string_len(128))
                    .col(ColumnDef::new(ContentQueueItem::LastError).text())
                    .col(ColumnDef::new(ContentQueueItem::LastErrorType).string_len(48))
                    .col(ColumnDef::new(ContentQueueItem::LastErrorAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(ContentQueueItem::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(ContentQueueItem::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_content_queue_item_content")
                            .from(ContentQueueItem::Table, ContentQueueItem::ContentId)
                            .to(Content::Table, Content::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_content_queue_item_rule")
                            .from(ContentQueueItem::Table, ContentQueueItem::RuleId)
                            .to(DistributionRule::Table, DistributionRule::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_content_queue_item_bot_chat")
                            .from(ContentQueueItem::Table, ContentQueueItem::BotChatId)
                            .to(BotChat::Table, BotChat::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One item per (content, rule, chat)
        manager
            .create_index(
                Index::create()
                    .name("idx_content_queue_item_content_rule_chat")
                    .table(ContentQueueItem::Table)
                    .col(ContentQueueItem::ContentId)
                    .col(ContentQueueItem::RuleId)
                    .col(ContentQueueItem::BotChatId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Dispatcher: due items in scheduled order
        manager
            .create_index(
                Index::create()
                    .name("idx_content_queue_item_status_scheduled_at")
                    .table(ContentQueueItem::Table)
                    .col(ContentQueueItem::Status)
                    .col(ContentQueueItem::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        // Compaction: one destination queue at a time
        manager
            .create_index(
                Index::create()
                    .name("idx_content_queue_item_bot_chat_status")
                    .table(ContentQueueItem::Table)
                    .col(ContentQueueItem::BotChatId)
                    .col(ContentQueueItem::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_content_queue_item_rule_id")
                    .table(ContentQueueItem::Table)
                    .col(ContentQueueItem::RuleId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ContentQueueItem::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ContentQueueItem {
    Table,
    Id,
    ContentId,
    RuleId,
    BotChatId,
    TargetChatId,
    Status,
    Priority,
    ScheduledAt,
    IsManualSchedule,
    NeedsApproval,
    ApprovedAt,
    AttemptCount,
    MaxAttempts,
    NextAttemptAt,
    LockedAt,
    LockedBy,
    MessageId,
    LastError,
    LastErrorType,
    LastErrorAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Content {
    Table,
    Id,
}

#[derive(Iden)]
enum DistributionRule {
    Table,
    Id,
}

#[derive(Iden)]
enum BotChat {
    Table,
    Id,
}
