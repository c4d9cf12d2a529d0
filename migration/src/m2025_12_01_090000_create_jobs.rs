//! Migration to create the jobs table.
//!
//! Import and deletion jobs share one table discriminated by `kind`. The row
//! carries every piece of resumable state: cursor, counters, retry budget and
//! the accumulated error list.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Jobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Jobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Jobs::OwnerId).uuid().not_null())
                    .col(ColumnDef::new(Jobs::Kind).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Jobs::Status)
                            .string_len(32)
                            .not_null()
                            .default("queued"),
                    )
                    .col(ColumnDef::new(Jobs::SourceDescriptor).json_binary().null())
                    .col(ColumnDef::new(Jobs::TargetIds).json_binary().null())
                    .col(ColumnDef::new(Jobs::Options).json_binary().not_null())
                    .col(
                        ColumnDef::new(Jobs::TotalItems)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Jobs::ProcessedItems)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Jobs::MatchedCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Jobs::NewCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Jobs::SuggestedCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Jobs::ErrorCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Jobs::Errors).json_binary().not_null())
                    .col(
                        ColumnDef::new(Jobs::Cursor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Jobs::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Jobs::LastError).text().null())
                    .col(
                        ColumnDef::new(Jobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Jobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Jobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Jobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Owner-scoped listing, newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_owner_created")
                    .table(Jobs::Table)
                    .col(Jobs::OwnerId)
                    .col(Jobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Watchdog scans for stale non-terminal jobs
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_status_updated")
                    .table(Jobs::Table)
                    .col(Jobs::Status)
                    .col(Jobs::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_jobs_owner_created").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_jobs_status_updated").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Jobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
    OwnerId,
    Kind,
    Status,
    SourceDescriptor,
    TargetIds,
    Options,
    TotalItems,
    ProcessedItems,
    MatchedCount,
    NewCount,
    SuggestedCount,
    ErrorCount,
    Errors,
    Cursor,
    RetryCount,
    LastError,
    CreatedAt,
    StartedAt,
    CompletedAt,
    UpdatedAt,
}
