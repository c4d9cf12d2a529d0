//! # MatchSuggestion Repository
//!
//! Manual review of match candidates the importer did not auto-link.

use axum::http::StatusCode;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::match_link::{self, Entity as MatchLink, LinkOrigin, LinkType};
use crate::models::match_suggestion::{ActiveModel, Column, Entity, Model, SuggestionStatus};

fn internal(message: &str) -> impl Fn(sea_orm::DbErr) -> ApiError + '_ {
    move |e| {
        tracing::error!("{}: {}", message, e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }
}

pub struct SuggestionRepository {
    db: DatabaseConnection,
}

impl SuggestionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Pending suggestions for an owner, highest confidence first
    pub async fn list_pending(&self, owner_id: Uuid, limit: u64) -> Result<Vec<Model>, ApiError> {
        Entity::find()
            .filter(Column::OwnerId.eq(owner_id))
            .filter(Column::Status.eq(SuggestionStatus::Pending))
            .order_by_desc(Column::Confidence)
            .order_by_desc(Column::UpdatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(internal("Failed to list suggestions"))
    }

    async fn find_pending(&self, owner_id: Uuid, suggestion_id: Uuid) -> Result<Model, ApiError> {
        let suggestion = Entity::find_by_id(suggestion_id)
            .filter(Column::OwnerId.eq(owner_id))
            .one(&self.db)
            .await
            .map_err(internal("Failed to find suggestion"))?
            .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Suggestion not found"))?;

        if suggestion.status != SuggestionStatus::Pending {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                "Suggestion was already reviewed",
            ));
        }
        Ok(suggestion)
    }

    /// Confirm a suggestion into the record's manual link.
    ///
    /// The manual link is upserted on `(supplier_record_id, origin)`, so a
    /// later confirmation for the same record replaces the earlier one.
    pub async fn confirm(
        &self,
        owner_id: Uuid,
        suggestion_id: Uuid,
        confirmed_by: &str,
    ) -> Result<match_link::Model, ApiError> {
        let suggestion = self.find_pending(owner_id, suggestion_id).await?;
        let now = Utc::now().fixed_offset();

        let txn = self.db.begin().await.map_err(internal("Failed to begin transaction"))?;

        let link = match_link::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_id: Set(owner_id),
            supplier_record_id: Set(suggestion.supplier_record_id),
            canonical_product_id: Set(suggestion.canonical_product_id),
            link_type: Set(LinkType::Manual),
            origin: Set(LinkOrigin::Manual),
            confidence: Set(100),
            created_by: Set(confirmed_by.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        MatchLink::insert(link)
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
            .exec_without_returning(&txn)
            .await
            .map_err(internal("Failed to write manual link"))?;

        let mut active: ActiveModel = suggestion.clone().into();
        active.status = Set(SuggestionStatus::Confirmed);
        active.updated_at = Set(now);
        active
            .update(&txn)
            .await
            .map_err(internal("Failed to update suggestion"))?;

        let link = MatchLink::find()
            .filter(match_link::Column::SupplierRecordId.eq(suggestion.supplier_record_id))
            .filter(match_link::Column::Origin.eq(LinkOrigin::Manual))
            .one(&txn)
            .await
            .map_err(internal("Failed to read manual link"))?
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Manual link missing after confirmation",
                )
            })?;

        txn.commit().await.map_err(internal("Failed to commit confirmation"))?;

        tracing::info!(
            owner_id = %owner_id,
            suggestion_id = %suggestion_id,
            supplier_record_id = %link.supplier_record_id,
            canonical_product_id = %link.canonical_product_id,
            "Suggestion confirmed"
        );
        Ok(link)
    }

    pub async fn reject(&self, owner_id: Uuid, suggestion_id: Uuid) -> Result<Model, ApiError> {
        let suggestion = self.find_pending(owner_id, suggestion_id).await?;

        let mut active: ActiveModel = suggestion.into();
        active.status = Set(SuggestionStatus::Rejected);
        active.updated_at = Set(Utc::now().fixed_offset());
        let updated = active
            .update(&self.db)
            .await
            .map_err(internal("Failed to update suggestion"))?;

        tracing::info!(owner_id = %owner_id, suggestion_id = %suggestion_id, "Suggestion rejected");
        Ok(updated)
    }
}
