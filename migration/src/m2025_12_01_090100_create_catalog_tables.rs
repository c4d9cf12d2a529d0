//! Migration to create the canonical_products and supplier_records tables.
//!
//! Both natural keys are enforced by unique indexes so concurrent chunks can
//! rely on `ON CONFLICT` upserts instead of check-then-insert.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CanonicalProducts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CanonicalProducts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CanonicalProducts::OwnerId).uuid().not_null())
                    .col(ColumnDef::new(CanonicalProducts::Ean).string_len(14).null())
                    .col(ColumnDef::new(CanonicalProducts::Name).text().not_null())
                    .col(ColumnDef::new(CanonicalProducts::Brand).text().null())
                    .col(
                        ColumnDef::new(CanonicalProducts::Attributes)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CanonicalProducts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CanonicalProducts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one canonical product per (owner, EAN); NULL EANs are exempt
        manager
            .create_index(
                Index::create()
                    .name("uq_canonical_products_owner_ean")
                    .table(CanonicalProducts::Table)
                    .col(CanonicalProducts::OwnerId)
                    .col(CanonicalProducts::Ean)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Matcher candidate window
        manager
            .create_index(
                Index::create()
                    .name("idx_canonical_products_owner_updated")
                    .table(CanonicalProducts::Table)
                    .col(CanonicalProducts::OwnerId)
                    .col(CanonicalProducts::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SupplierRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SupplierRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SupplierRecords::OwnerId).uuid().not_null())
                    .col(ColumnDef::new(SupplierRecords::SourceId).text().not_null())
                    .col(
                        ColumnDef::new(SupplierRecords::ExternalReference)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SupplierRecords::Ean).string_len(14).null())
                    .col(ColumnDef::new(SupplierRecords::Name).text().not_null())
                    .col(ColumnDef::new(SupplierRecords::Brand).text().null())
                    .col(ColumnDef::new(SupplierRecords::Price).double().not_null())
                    .col(
                        ColumnDef::new(SupplierRecords::Stock)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SupplierRecords::Currency)
                            .string_len(3)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SupplierRecords::Extra).json_binary().not_null())
                    .col(
                        ColumnDef::new(SupplierRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SupplierRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_supplier_records_owner_source_reference")
                    .table(SupplierRecords::Table)
                    .col(SupplierRecords::OwnerId)
                    .col(SupplierRecords::SourceId)
                    .col(SupplierRecords::ExternalReference)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("uq_supplier_records_owner_source_reference")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(SupplierRecords::Table).to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_canonical_products_owner_updated")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("uq_canonical_products_owner_ean")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(CanonicalProducts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CanonicalProducts {
    Table,
    Id,
    OwnerId,
    Ean,
    Name,
    Brand,
    Attributes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SupplierRecords {
    Table,
    Id,
    OwnerId,
    SourceId,
    ExternalReference,
    Ean,
    Name,
    Brand,
    Price,
    Stock,
    Currency,
    Extra,
    CreatedAt,
    UpdatedAt,
}
