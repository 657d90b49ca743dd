//! Create `content` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Content::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Content::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Content::Platform).string_len(32).not_null())
                    .col(ColumnDef::new(Content::Url).text().not_null())
                    .col(ColumnDef::new(Content::CanonicalUrl).text().not_null())
                    .col(
                        ColumnDef::new(Content::Status)
                            .string_len(16)
                            .not_null()
                            .default("unprocessed"),
                    )
                    .col(
                        ColumnDef::new(Content::ReviewStatus)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Content::Tags)
                            .json_binary()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Content::IsNsfw)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Content::Source).string_len(64))
                    .col(ColumnDef::new(Content::Title).text())
                    .col(ColumnDef::new(Content::Body).text())
                    .col(ColumnDef::new(Content::CoverUrl).text())
                    .col(
                        ColumnDef::new(Content::MediaUrls)
                            .json_binary()
                            .not_null()
                            .default("[]"),
                    )
                    .col(ColumnDef::new(Content::AuthorName).string_len(256))
                    .col(ColumnDef::new(Content::AuthorId).string_len(128))
                    .col(ColumnDef::new(Content::AuthorUrl).text())
                    .col(
                        ColumnDef::new(Content::Stats)
                            .json_binary()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(Content::FailureCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Content::LastError).text())
                    .col(ColumnDef::new(Content::LastErrorType).string_len(32))
                    .col(ColumnDef::new(Content::LastErrorAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Content::ReviewedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Content::ReviewedBy).string_len(64))
                    .col(ColumnDef::new(Content::ReviewNote).text())
                    .col(ColumnDef::new(Content::PublishedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Content::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Content::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // One row per shared post
        manager
            .create_index(
                Index::create()
                    .name("idx_content_platform_canonical_url")
                    .table(Content::Table)
                    .col(Content::Platform)
                    .col(Content::CanonicalUrl)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_content_status_created_at")
                    .table(Content::Table)
                    .col(Content::Status)
                    .col(Content::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_content_review_status")
                    .table(Content::Table)
                    .col(Content::ReviewStatus)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Content::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Content {
    Table,
    Id,
    Platform,
    Url,
    CanonicalUrl,
    Status,
    ReviewStatus,
    Tags,
    IsNsfw,
    Source,
    Title,
    Body,
    CoverUrl,
    MediaUrls,
    AuthorName,
    AuthorId,
    AuthorUrl,
    Stats,
    FailureCount,
    LastError,
    LastErrorType,
    LastErrorAt,
    ReviewedAt,
    ReviewedBy,
    ReviewNote,
    PublishedAt,
    CreatedAt,
    UpdatedAt,
}
