//! Upsert writer
//!
//! Persists one transformed row and its match outcome in a single
//! transaction. Every write is keyed on a natural unique index, so replaying a
//! chunk converges on the same rows.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use super::matcher::{EXACT_CONFIDENCE, MatchDecision, MatchResult};
use super::transform::ProductRow;
use crate::jobs::cascade::remove_if_orphaned;
use crate::models::canonical_product::{self, Entity as CanonicalProduct};
use crate::models::match_link::{self, Entity as MatchLink, LinkOrigin, LinkType};
use crate::models::match_suggestion::{self, Entity as MatchSuggestion, SuggestionStatus};
use crate::models::supplier_record::{self, Entity as SupplierRecord};

/// How a row was reconciled; drives the job counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Automatic link created or refreshed
    Linked,
    /// Suggestion recorded for review
    Suggested,
    /// New canonical product created and linked
    Created,
    /// Existing link left in place: no candidate, or the candidate is
    /// already linked to this record
    Kept,
}

#[derive(Debug, Clone)]
pub struct UpsertResult {
    pub outcome: UpsertOutcome,
    pub supplier_record_id: Uuid,
    /// Canonical product created by this row, if any
    pub created: Option<canonical_product::Model>,
    /// Canonical product deleted because moving this row's link left it unlinked
    pub released: Option<Uuid>,
}

/// Scope shared by every row of a chunk
#[derive(Debug, Clone, Copy)]
pub struct UpsertScope<'a> {
    pub owner_id: Uuid,
    pub source_id: &'a str,
    pub job_id: Uuid,
}

pub struct UpsertWriter {
    db: DatabaseConnection,
}

impl UpsertWriter {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn upsert(
        &self,
        scope: UpsertScope<'_>,
        row: &ProductRow,
        decision: MatchDecision,
    ) -> Result<UpsertResult, DbErr> {
        let txn = self.db.begin().await?;

        let record = upsert_supplier_record(&txn, scope, row).await?;

        let result = match decision {
            MatchDecision::AutoLink(matched) => {
                let previous = automatic_link(&txn, record.id).await?;
                upsert_automatic_link(&txn, scope, record.id, matched).await?;

                let mut released = None;
                if let Some(previous) = previous
                    && previous.canonical_product_id != matched.canonical_product_id
                    && remove_if_orphaned(&txn, scope.owner_id, previous.canonical_product_id)
                        .await?
                        .is_some()
                {
                    debug!(canonical_product_id = %previous.canonical_product_id, "Unlinked canonical product removed");
                    released = Some(previous.canonical_product_id);
                }

                UpsertResult {
                    outcome: UpsertOutcome::Linked,
                    supplier_record_id: record.id,
                    created: None,
                    released,
                }
            }
            MatchDecision::Suggest(matched) => {
                let already_linked = MatchLink::find()
                    .filter(match_link::Column::SupplierRecordId.eq(record.id))
                    .filter(match_link::Column::CanonicalProductId.eq(matched.canonical_product_id))
                    .one(&txn)
                    .await?
                    .is_some();

                let outcome = if already_linked {
                    UpsertOutcome::Kept
                } else {
                    upsert_suggestion(&txn, scope, record.id, matched).await?;
                    UpsertOutcome::Suggested
                };
                UpsertResult {
                    outcome,
                    supplier_record_id: record.id,
                    created: None,
                    released: None,
                }
            }
            MatchDecision::NoMatch => {
                if automatic_link(&txn, record.id).await?.is_some() {
                    UpsertResult {
                        outcome: UpsertOutcome::Kept,
                        supplier_record_id: record.id,
                        created: None,
                        released: None,
                    }
                } else {
                    let product = create_canonical(&txn, scope.owner_id, row).await?;
                    upsert_automatic_link(
                        &txn,
                        scope,
                        record.id,
                        MatchResult {
                            canonical_product_id: product.id,
                            link_type: LinkType::ExactId,
                            confidence: EXACT_CONFIDENCE,
                        },
                    )
                    .await?;
                    UpsertResult {
                        outcome: UpsertOutcome::Created,
                        supplier_record_id: record.id,
                        created: Some(product),
                        released: None,
                    }
                }
            }
        };

        txn.commit().await?;

        debug!(
            supplier_record_id = %result.supplier_record_id,
            outcome = ?result.outcome,
            external_reference = %row.external_reference,
            "Row persisted"
        );
        Ok(result)
    }
}

async fn upsert_supplier_record(
    txn: &DatabaseTransaction,
    scope: UpsertScope<'_>,
    row: &ProductRow,
) -> Result<supplier_record::Model, DbErr> {
    let now = Utc::now().fixed_offset();
    let model = supplier_record::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(scope.owner_id),
        source_id: Set(scope.source_id.to_string()),
        external_reference: Set(row.external_reference.clone()),
        ean: Set(row.ean.clone()),
        name: Set(row.name.clone()),
        brand: Set(row.brand.clone()),
        price: Set(row.price),
        stock: Set(row.stock),
        currency: Set(row.currency.clone()),
        extra: Set(json!(row.extra)),
        created_at: Set(now),
        updated_at: Set(now),
    };

    SupplierRecord::insert(model)
        .on_conflict(
            OnConflict::columns([
                supplier_record::Column::OwnerId,
                supplier_record::Column::SourceId,
                supplier_record::Column::ExternalReference,
            ])
            .update_columns([
                supplier_record::Column::Ean,
                supplier_record::Column::Name,
                supplier_record::Column::Brand,
                supplier_record::Column::Price,
                supplier_record::Column::Stock,
                supplier_record::Column::Currency,
                supplier_record::Column::Extra,
                supplier_record::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;

    SupplierRecord::find()
        .filter(supplier_record::Column::OwnerId.eq(scope.owner_id))
        .filter(supplier_record::Column::SourceId.eq(scope.source_id))
        .filter(supplier_record::Column::ExternalReference.eq(row.external_reference.as_str()))
        .one(txn)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound("supplier record after upsert".to_string()))
}

async fn automatic_link(
    txn: &DatabaseTransaction,
    supplier_record_id: Uuid,
) -> Result<Option<match_link::Model>, DbErr> {
    MatchLink::find()
        .filter(match_link::Column::SupplierRecordId.eq(supplier_record_id))
        .filter(match_link::Column::Origin.eq(LinkOrigin::Automatic))
        .one(txn)
        .await
}

async fn upsert_automatic_link(
    txn: &DatabaseTransaction,
    scope: UpsertScope<'_>,
    supplier_record_id: Uuid,
    matched: MatchResult,
) -> Result<(), DbErr> {
    let now = Utc::now().fixed_offset();
    let model = match_link::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(scope.owner_id),
        supplier_record_id: Set(supplier_record_id),
        canonical_product_id: Set(matched.canonical_product_id),
        link_type: Set(matched.link_type),
        origin: Set(LinkOrigin::Automatic),
        confidence: Set(i16::from(matched.confidence)),
        created_by: Set(scope.job_id.to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    };

    MatchLink::insert(model)
        .on_conflict(
            OnConflict::columns([
                match_link::Column::SupplierRecordId,
                match_link::Column::Origin,
            ])
            .update_columns([
                match_link::Column::CanonicalProductId,
                match_link::Column::LinkType,
                match_link::Column::Confidence,
                match_link::Column::CreatedBy,
                match_link::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;
    Ok(())
}

/// Status is never touched on conflict: a rejected pair stays rejected.
async fn upsert_suggestion(
    txn: &DatabaseTransaction,
    scope: UpsertScope<'_>,
    supplier_record_id: Uuid,
    matched: MatchResult,
) -> Result<(), DbErr> {
    let now = Utc::now().fixed_offset();
    let model = match_suggestion::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(scope.owner_id),
        job_id: Set(Some(scope.job_id)),
        supplier_record_id: Set(supplier_record_id),
        canonical_product_id: Set(matched.canonical_product_id),
        link_type: Set(matched.link_type),
        confidence: Set(i16::from(matched.confidence)),
        status: Set(SuggestionStatus::Pending),
        created_at: Set(now),
        updated_at: Set(now),
    };

    MatchSuggestion::insert(model)
        .on_conflict(
            OnConflict::columns([
                match_suggestion::Column::SupplierRecordId,
                match_suggestion::Column::CanonicalProductId,
            ])
            .update_columns([
                match_suggestion::Column::JobId,
                match_suggestion::Column::LinkType,
                match_suggestion::Column::Confidence,
                match_suggestion::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;
    Ok(())
}

/// Create a canonical product for an unmatched row.
///
/// Rows with an EAN go through `ON CONFLICT (owner_id, ean) DO NOTHING` and a
/// read, so a product inserted concurrently by another chunk is reused.
async fn create_canonical(
    txn: &DatabaseTransaction,
    owner_id: Uuid,
    row: &ProductRow,
) -> Result<canonical_product::Model, DbErr> {
    let now = Utc::now().fixed_offset();
    let model = canonical_product::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        ean: Set(row.ean.clone()),
        name: Set(row.name.clone()),
        brand: Set(row.brand.clone()),
        attributes: Set(json!(row.extra)),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let Some(ean) = &row.ean else {
        return model.insert(txn).await;
    };

    let inserted = CanonicalProduct::insert(model)
        .on_conflict(
            OnConflict::columns([
                canonical_product::Column::OwnerId,
                canonical_product::Column::Ean,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;

    if inserted == 0 {
        debug!(ean = %ean, "Canonical product already existed for EAN");
    }

    CanonicalProduct::find()
        .filter(canonical_product::Column::OwnerId.eq(owner_id))
        .filter(canonical_product::Column::Ean.eq(ean.as_str()))
        .one(txn)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound("canonical product after upsert".to_string()))
}
