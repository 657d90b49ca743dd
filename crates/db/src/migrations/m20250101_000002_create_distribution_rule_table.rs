//! Create `distribution_rule` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DistributionRule::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DistributionRule::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DistributionRule::Name)
                            .string_len(128)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(DistributionRule::Description).text())
                    .col(
                        ColumnDef::new(DistributionRule::MatchConditions)
                            .json_binary()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(DistributionRule::NsfwPolicy)
                            .string_len(24)
                            .not_null()
                            .default("block"),
                    )
                    .col(
                        ColumnDef::new(DistributionRule::ApprovalRequired)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(DistributionRule::AutoApproveConditions).json_binary())
                    .col(ColumnDef::new(DistributionRule::RateLimit).integer())
                    .col(ColumnDef::new(DistributionRule::TimeWindow).integer())
                    .col(
                        ColumnDef::new(DistributionRule::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DistributionRule::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(DistributionRule::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(DistributionRule::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Enabled rules are always loaded by priority
        manager
            .create_index(
                Index::create()
                    .name("idx_distribution_rule_enabled_priority")
                    .table(DistributionRule::Table)
                    .col(DistributionRule::Enabled)
                    .col(DistributionRule::Priority)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DistributionRule::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum DistributionRule {
    Table,
    Id,
    Name,
    Description,
    MatchConditions,
    NsfwPolicy,
    ApprovalRequired,
    AutoApproveConditions,
    RateLimit,
    TimeWindow,
    Priority,
    Enabled,
    CreatedAt,
    UpdatedAt,
}
