//! Create `distribution_target` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DistributionTarget::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DistributionTarget::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DistributionTarget::RuleId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DistributionTarget::BotChatId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DistributionTarget::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(DistributionTarget::MergeForward)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(DistributionTarget::RenderConfig).json_binary())
                    .col(
                        ColumnDef::new(DistributionTarget::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(DistributionTarget::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_distribution_target_rule")
                            .from(DistributionTarget::Table, DistributionTarget::RuleId)
                            .to(DistributionRule::Table, DistributionRule::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_distribution_target_bot_chat")
                            .from(DistributionTarget::Table, DistributionTarget::BotChatId)
                            .to(BotChat::Table, BotChat::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_distribution_target_rule_bot_chat")
                    .table(DistributionTarget::Table)
                    .col(DistributionTarget::RuleId)
                    .col(DistributionTarget::BotChatId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_distribution_target_bot_chat_id")
                    .table(DistributionTarget::Table)
                    .col(DistributionTarget::BotChatId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DistributionTarget::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum DistributionTarget {
    Table,
    Id,
    RuleId,
    BotChatId,
    Enabled,
    MergeForward,
    RenderConfig,
    CreatedAt,
    UpdatedAt,
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
