//! MatchLink entity model
//!
//! Asserts that a supplier record and a canonical product describe the same
//! physical product. Unique per `(supplier_record_id, origin)`: one automatic
//! link and one manual link at most, the manual one winning for display.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Strategy that produced a link or suggestion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    #[sea_orm(string_value = "exact_id")]
    ExactId,
    #[sea_orm(string_value = "fuzzy_name")]
    FuzzyName,
    #[sea_orm(string_value = "brand_model")]
    BrandModel,
    #[sea_orm(string_value = "manual")]
    Manual,
}

impl LinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::ExactId => "exact_id",
            LinkType::FuzzyName => "fuzzy_name",
            LinkType::BrandModel => "brand_model",
            LinkType::Manual => "manual",
        }
    }
}

/// Who created the link.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum LinkOrigin {
    #[sea_orm(string_value = "automatic")]
    Automatic,
    #[sea_orm(string_value = "manual")]
    Manual,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "match_links")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub owner_id: Uuid,

    pub supplier_record_id: Uuid,

    pub canonical_product_id: Uuid,

    pub link_type: LinkType,

    pub origin: LinkOrigin,

    /// Confidence in [0, 100]
    pub confidence: i16,

    /// Job id for automatic links, user reference for manual ones
    pub created_by: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::supplier_record::Entity",
        from = "Column::SupplierRecordId",
        to = "super::supplier_record::Column::Id"
    )]
    SupplierRecord,
    #[sea_orm(
        belongs_to = "super::canonical_product::Entity",
        from = "Column::CanonicalProductId",
        to = "super::canonical_product::Column::Id"
    )]
    CanonicalProduct,
}

impl Related<super::supplier_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SupplierRecord.def()
    }
}

impl Related<super::canonical_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CanonicalProduct.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
