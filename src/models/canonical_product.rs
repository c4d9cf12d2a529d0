//! CanonicalProduct entity model
//!
//! The deduplicated, source-independent product. At most one row exists per
//! `(owner_id, ean)` when `ean` is present.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "canonical_products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub owner_id: Uuid,

    /// Validated GTIN-13, if the creating row carried one
    pub ean: Option<String>,

    pub name: String,

    pub brand: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub attributes: JsonValue,

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
