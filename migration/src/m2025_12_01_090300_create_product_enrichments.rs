//! Migration to create the product_enrichments table.
//!
//! Enrichment rows are written by the external enrichment service and scoped
//! to either a canonical product or a supplier record.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProductEnrichments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductEnrichments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProductEnrichments::OwnerId).uuid().not_null())
                    .col(
                        ColumnDef::new(ProductEnrichments::CanonicalProductId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProductEnrichments::SupplierRecordId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(ProductEnrichments::Kind).text().not_null())
                    .col(
                        ColumnDef::new(ProductEnrichments::Content)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductEnrichments::CreatedAt)
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
                    .name("idx_product_enrichments_canonical_product")
                    .table(ProductEnrichments::Table)
                    .col(ProductEnrichments::CanonicalProductId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_product_enrichments_supplier_record")
                    .table(ProductEnrichments::Table)
                    .col(ProductEnrichments::SupplierRecordId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_product_enrichments_supplier_record")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_product_enrichments_canonical_product")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(ProductEnrichments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ProductEnrichments {
    Table,
    Id,
    OwnerId,
    CanonicalProductId,
    SupplierRecordId,
    Kind,
    Content,
    CreatedAt,
}
