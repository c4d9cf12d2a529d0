//! # Data Models
//!
//! SeaORM entities for jobs, chunk tasks and the product catalog.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod canonical_product;
pub mod chunk_task;
pub mod job;
pub mod match_link;
pub mod match_suggestion;
pub mod product_enrichment;
pub mod supplier_record;

pub use canonical_product::Entity as CanonicalProduct;
pub use chunk_task::Entity as ChunkTask;
pub use job::Entity as Job;
pub use match_link::Entity as MatchLink;
pub use match_suggestion::Entity as MatchSuggestion;
pub use product_enrichment::Entity as ProductEnrichment;
pub use supplier_record::Entity as SupplierRecord;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "catalog-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
