//! Migration to create the match_links and match_suggestions tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MatchLinks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(MatchLinks::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(MatchLinks::OwnerId).uuid().not_null())
                    .col(ColumnDef::new(MatchLinks::SupplierRecordId).uuid().not_null())
                    .col(
                        ColumnDef::new(MatchLinks::CanonicalProductId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MatchLinks::LinkType).string_len(16).not_null())
                    .col(ColumnDef::new(MatchLinks::Origin).string_len(16).not_null())
                    .col(
                        ColumnDef::new(MatchLinks::Confidence)
                            .small_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MatchLinks::CreatedBy).text().not_null())
                    .col(
                        ColumnDef::new(MatchLinks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MatchLinks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_match_links_supplier_record_id")
                            .from(MatchLinks::Table, MatchLinks::SupplierRecordId)
                            .to(SupplierRecords::Table, SupplierRecords::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_match_links_canonical_product_id")
                            .from(MatchLinks::Table, MatchLinks::CanonicalProductId)
                            .to(CanonicalProducts::Table, CanonicalProducts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One automatic and one manual link per supplier record
        manager
            .create_index(
                Index::create()
                    .name("uq_match_links_supplier_origin")
                    .table(MatchLinks::Table)
                    .col(MatchLinks::SupplierRecordId)
                    .col(MatchLinks::Origin)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_match_links_canonical_product")
                    .table(MatchLinks::Table)
                    .col(MatchLinks::CanonicalProductId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MatchSuggestions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MatchSuggestions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MatchSuggestions::OwnerId).uuid().not_null())
                    .col(ColumnDef::new(MatchSuggestions::JobId).uuid().null())
                    .col(
                        ColumnDef::new(MatchSuggestions::SupplierRecordId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MatchSuggestions::CanonicalProductId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MatchSuggestions::LinkType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MatchSuggestions::Confidence)
                            .small_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MatchSuggestions::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(MatchSuggestions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MatchSuggestions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_match_suggestions_supplier_record_id")
                            .from(MatchSuggestions::Table, MatchSuggestions::SupplierRecordId)
                            .to(SupplierRecords::Table, SupplierRecords::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_match_suggestions_canonical_product_id")
                            .from(
                                MatchSuggestions::Table,
                                MatchSuggestions::CanonicalProductId,
                            )
                            .to(CanonicalProducts::Table, CanonicalProducts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_match_suggestions_pair")
                    .table(MatchSuggestions::Table)
                    .col(MatchSuggestions::SupplierRecordId)
                    .col(MatchSuggestions::CanonicalProductId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_match_suggestions_owner_status")
                    .table(MatchSuggestions::Table)
                    .col(MatchSuggestions::OwnerId)
                    .col(MatchSuggestions::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for index in [
            "idx_match_suggestions_owner_status",
            "uq_match_suggestions_pair",
            "idx_match_links_canonical_product",
            "uq_match_links_supplier_origin",
        ] {
            manager
                .drop_index(Index::drop().name(index).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(MatchSuggestions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MatchLinks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MatchLinks {
    Table,
    Id,
    OwnerId,
    SupplierRecordId,
    CanonicalProductId,
    LinkType,
    Origin,
    Confidence,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MatchSuggestions {
    Table,
    Id,
    OwnerId,
    JobId,
    SupplierRecordId,
    CanonicalProductId,
    LinkType,
    Confidence,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SupplierRecords {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum CanonicalProducts {
    Table,
    Id,
}
