//! Migration to create the chunk_tasks table.
//!
//! Each row is one persisted continuation: the next slice of a job waiting to
//! be claimed by a worker. The `(job_id, chunk_offset)` unique index makes a
//! double dispatch of the same slice impossible.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChunkTasks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ChunkTasks::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(ChunkTasks::JobId).uuid().not_null())
                    .col(ColumnDef::new(ChunkTasks::Kind).string_len(16).not_null())
                    .col(
                        ColumnDef::new(ChunkTasks::ChunkOffset)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChunkTasks::ChunkLimit)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChunkTasks::Status)
                            .string_len(16)
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(ChunkTasks::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ChunkTasks::RunAfter)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(ChunkTasks::ClaimedBy).uuid().null())
                    .col(
                        ColumnDef::new(ChunkTasks::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChunkTasks::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChunkTasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ChunkTasks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chunk_tasks_job_id")
                            .from(ChunkTasks::Table, ChunkTasks::JobId)
                            .to(Jobs::Table, Jobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_chunk_tasks_job_offset")
                    .table(ChunkTasks::Table)
                    .col(ChunkTasks::JobId)
                    .col(ChunkTasks::ChunkOffset)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Claim query: queued tasks whose backoff has elapsed
        manager
            .create_index(
                Index::create()
                    .name("idx_chunk_tasks_status_run_after")
                    .table(ChunkTasks::Table)
                    .col(ChunkTasks::Status)
                    .col(ChunkTasks::RunAfter)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_chunk_tasks_status_run_after")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("uq_chunk_tasks_job_offset").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ChunkTasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChunkTasks {
    Table,
    Id,
    JobId,
    Kind,
    ChunkOffset,
    ChunkLimit,
    Status,
    Attempts,
    RunAfter,
    ClaimedBy,
    StartedAt,
    FinishedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
}
