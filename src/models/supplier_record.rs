//! SupplierRecord entity model
//!
//! One external system's view of a product, unique per
//! `(owner_id, source_id, external_reference)`. Re-imports update in place.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "supplier_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub owner_id: Uuid,

    /// Identifier of the source this record was imported from
    pub source_id: String,

    pub external_reference: String,

    pub ean: Option<String>,

    pub name: String,

    pub brand: Option<String>,

    #[sea_orm(column_type = "Double")]
    pub price: f64,

    pub stock: i64,

    /// ISO 4217 code
    pub currency: String,

    /// Bounded extension map of unmapped source columns
    #[sea_orm(column_type = "JsonBinary")]
    pub extra: JsonValue,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::match_link::Entity")]
    MatchLink,
}

impl Related<super::match_link::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MatchLink.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
