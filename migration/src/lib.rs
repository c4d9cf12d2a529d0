//! Database migrations for the catalog sync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_090000_create_jobs;
mod m2025_12_01_090100_create_catalog_tables;
mod m2025_12_01_090200_create_match_tables;
mod m2025_12_01_090300_create_product_enrichments;
mod m2025_12_01_090400_create_chunk_tasks;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_090000_create_jobs::Migration),
            Box::new(m2025_12_01_090100_create_catalog_tables::Migration),
            Box::new(m2025_12_01_090200_create_match_tables::Migration),
            Box::new(m2025_12_01_090300_create_product_enrichments::Migration),
            Box::new(m2025_12_01_090400_create_chunk_tasks::Migration),
        ]
    }
}
