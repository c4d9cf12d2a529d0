//! ProductEnrichment entity model
//!
//! Derived rows written by the enrichment service. Removed by the cascading
//! deleter together with the entity they describe.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "product_enrichments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub owner_id: Uuid,

    pub canonical_product_id: Option<Uuid>,

    pub supplier_record_id: Option<Uuid>,

    /// Enrichment flavour, e.g. `description` or `category`
    pub kind: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub content: JsonValue,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
