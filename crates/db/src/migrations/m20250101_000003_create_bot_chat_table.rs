//! Create `bot_chat` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BotChat::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BotChat::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BotChat::Platform).string_len(32).not_null())
                    .col(ColumnDef::new(BotChat::ChatId).string_len(128).not_null())
                    .col(ColumnDef::new(BotChat::Title).string_len(256))
                    .col(
                        ColumnDef::new(BotChat::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(BotChat::IsAccessible)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(BotChat::CanPost)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(BotChat::NsfwChatId).string_len(128))
                    .col(
                        ColumnDef::new(BotChat::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(BotChat::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bot_chat_platform_chat_id")
                    .table(BotChat::Table)
                    .col(BotChat::Platform)
                    .col(BotChat::ChatId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BotChat::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum BotChat {
    Table,
    Id,
    Platform,
    ChatId,
    Title,
    Enabled,
    IsAccessible,
    CanPost,
    NsfwChatId,
    CreatedAt,
    UpdatedAt,
}
