//! Cascading deleter
//!
//! Removes deletion targets one at a time, each in its own transaction under
//! an item timeout. For every target: enrichment rows, then links and
//! suggestions touching it, then canonical products this deletion left
//! without any link, then the entity itself.

use std::collections::BTreeSet;
use std::time::Duration;

use metrics::counter;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QuerySelect, TransactionTrait,
};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{ChunkFailure, ChunkReport, DeletionTarget, TargetEntity};
use crate::config::DeletionConfig;
use crate::error::is_connection_error;
use crate::models::canonical_product::{self, Entity as CanonicalProduct};
use crate::models::job::{self, ErrorEntry, ErrorKind};
use crate::models::match_link::{self, Entity as MatchLink};
use crate::models::match_suggestion::{self, Entity as MatchSuggestion};
use crate::models::product_enrichment::{self, Entity as ProductEnrichment};
use crate::models::supplier_record::{self, Entity as SupplierRecord};

/// What one target deletion removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeSummary {
    /// False when the target no longer existed
    pub found: bool,
    pub links: u64,
    pub suggestions: u64,
    pub enrichments: u64,
    pub orphaned_canonicals: u64,
}

pub struct CascadingDeleter {
    db: DatabaseConnection,
    config: DeletionConfig,
}

impl CascadingDeleter {
    pub fn new(db: DatabaseConnection, config: DeletionConfig) -> Self {
        Self { db, config }
    }

    /// Parse the target list persisted on a deletion job
    pub fn targets(job: &job::Model) -> Result<Vec<DeletionTarget>, ChunkFailure> {
        let raw = job
            .target_ids
            .clone()
            .ok_or_else(|| ChunkFailure::Fatal("deletion job has no targets".to_string()))?;
        serde_json::from_value(raw)
            .map_err(|e| ChunkFailure::Fatal(format!("unreadable deletion targets: {}", e)))
    }

    /// Delete targets `[offset, offset + limit)` of the job.
    #[instrument(skip(self, job), fields(job_id = %job.id, owner_id = %job.owner_id, chunk_offset = offset))]
    pub async fn run(&self, job: &job::Model, offset: i64, limit: i64) -> Result<ChunkReport, ChunkFailure> {
        let targets = Self::targets(job)?;
        let start = (offset.max(0) as usize).min(targets.len());
        let end = start.saturating_add(limit.max(1) as usize).min(targets.len());
        let item_timeout = Duration::from_millis(self.config.item_timeout_ms);
        let delay = Duration::from_millis(self.config.inter_item_delay_ms);

        let mut report = ChunkReport::default();
        for (index, target) in targets[start..end].iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                sleep(delay).await;
            }

            match timeout(item_timeout, self.delete_target(job.owner_id, target)).await {
                Ok(Ok(summary)) => {
                    report.imported += 1;
                    if summary.found {
                        counter!("catalog_items_deleted_total", "entity" => entity_label(target.entity))
                            .increment(1);
                    }
                    debug!(target_id = %target.id, ?summary, "Deletion target processed");
                }
                Ok(Err(e)) if is_connection_error(&e) => {
                    return Err(ChunkFailure::Transient(format!("database unavailable: {}", e)));
                }
                Ok(Err(e)) => {
                    warn!(target_id = %target.id, error = %e, "Deletion target failed");
                    report.errors.push(ErrorEntry::new(
                        target.id.to_string(),
                        ErrorKind::Database,
                        e.to_string(),
                    ));
                }
                Err(_) => {
                    warn!(target_id = %target.id, "Deletion target timed out");
                    report.errors.push(ErrorEntry::new(
                        target.id.to_string(),
                        ErrorKind::Timeout,
                        format!("item exceeded {}ms", self.config.item_timeout_ms),
                    ));
                }
            }
        }

        let consumed = (end - start) as u64;
        report.consumed = consumed;
        report.next_offset = offset + consumed as i64;
        report.has_more = end < targets.len();

        info!(
            consumed = consumed,
            deleted = report.imported,
            errors = report.errors.len(),
            has_more = report.has_more,
            "Deletion chunk processed"
        );
        Ok(report)
    }

    /// Remove one target and everything that depends on it.
    ///
    /// Targets that are missing, or owned by someone else, count as already deleted.
    pub async fn delete_target(&self, owner_id: Uuid, target: &DeletionTarget) -> Result<CascadeSummary, DbErr> {
        let txn = self.db.begin().await?;
        let summary = match target.entity {
            TargetEntity::SupplierRecord => delete_supplier_record(&txn, owner_id, target.id).await?,
            TargetEntity::CanonicalProduct => delete_canonical_product(&txn, owner_id, target.id).await?,
        };
        txn.commit().await?;
        Ok(summary)
    }
}

fn entity_label(entity: TargetEntity) -> &'static str {
    match entity {
        TargetEntity::SupplierRecord => "supplier_record",
        TargetEntity::CanonicalProduct => "canonical_product",
    }
}

async fn delete_supplier_record(
    txn: &DatabaseTransaction,
    owner_id: Uuid,
    record_id: Uuid,
) -> Result<CascadeSummary, DbErr> {
    let Some(record) = SupplierRecord::find_by_id(record_id)
        .filter(supplier_record::Column::OwnerId.eq(owner_id))
        .one(txn)
        .await?
    else {
        return Ok(CascadeSummary::default());
    };

    let mut summary = CascadeSummary {
        found: true,
        ..CascadeSummary::default()
    };

    summary.enrichments += ProductEnrichment::delete_many()
        .filter(product_enrichment::Column::SupplierRecordId.eq(record.id))
        .exec(txn)
        .await?
        .rows_affected;

    let linked: BTreeSet<Uuid> = MatchLink::find()
        .select_only()
        .column(match_link::Column::CanonicalProductId)
        .filter(match_link::Column::SupplierRecordId.eq(record.id))
        .into_tuple::<Uuid>()
        .all(txn)
        .await?
        .into_iter()
        .collect();

    summary.links += MatchLink::delete_many()
        .filter(match_link::Column::SupplierRecordId.eq(record.id))
        .exec(txn)
        .await?
        .rows_affected;

    summary.suggestions += MatchSuggestion::delete_many()
        .filter(match_suggestion::Column::SupplierRecordId.eq(record.id))
        .exec(txn)
        .await?
        .rows_affected;

    for canonical_id in linked {
        if let Some(removed) = remove_if_orphaned(txn, owner_id, canonical_id).await? {
            summary.orphaned_canonicals += 1;
            summary.enrichments += removed.enrichments;
            summary.suggestions += removed.suggestions;
        }
    }

    SupplierRecord::delete_by_id(record.id).exec(txn).await?;
    Ok(summary)
}

/// Delete a canonical product that no longer has any link, with its
/// enrichments and suggestions. Returns `None` while links remain.
pub(crate) async fn remove_if_orphaned(
    txn: &DatabaseTransaction,
    owner_id: Uuid,
    product_id: Uuid,
) -> Result<Option<CascadeSummary>, DbErr> {
    let remaining = MatchLink::find()
        .filter(match_link::Column::CanonicalProductId.eq(product_id))
        .count(txn)
        .await?;
    if remaining > 0 {
        return Ok(None);
    }

    let removed = delete_canonical_product(txn, owner_id, product_id).await?;
    Ok(removed.found.then_some(removed))
}

async fn delete_canonical_product(
    txn: &DatabaseTransaction,
    owner_id: Uuid,
    product_id: Uuid,
) -> Result<CascadeSummary, DbErr> {
    let Some(product) = CanonicalProduct::find_by_id(product_id)
        .filter(canonical_product::Column::OwnerId.eq(owner_id))
        .one(txn)
        .await?
    else {
        return Ok(CascadeSummary::default());
    };

    let enrichments = ProductEnrichment::delete_many()
        .filter(product_enrichment::Column::CanonicalProductId.eq(product.id))
        .exec(txn)
        .await?
        .rows_affected;

    let links = MatchLink::delete_many()
        .filter(match_link::Column::CanonicalProductId.eq(product.id))
        .exec(txn)
        .await?
        .rows_affected;

    let suggestions = MatchSuggestion::delete_many()
        .filter(match_suggestion::Column::CanonicalProductId.eq(product.id))
        .exec(txn)
        .await?
        .rows_affected;

    CanonicalProduct::delete_by_id(product.id).exec(txn).await?;

    Ok(CascadeSummary {
        found: true,
        links,
        suggestions,
        enrichments,
        orphaned_canonicals: 0,
    })
}
