//! # Match Suggestion Handlers
//!
//! Manual review queue for matches below the auto-link threshold.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::types::page_limit;
use crate::models::match_link::{self, LinkOrigin, LinkType};
use crate::models::match_suggestion::{self, SuggestionStatus};
use crate::repositories::SuggestionRepository;
use crate::server::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListSuggestionsQuery {
    pub owner_id: Uuid,
    /// Maximum number of suggestions to return (default: 50, max: 100)
    pub limit: Option<u32>,
}

/// Request body for reviewing a suggestion
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewRequest {
    pub owner_id: Uuid,
    /// Who made the call; stored on the manual link
    #[serde(default)]
    #[schema(example = "catalog-manager@example.com")]
    pub reviewed_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SuggestionView {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub supplier_record_id: Uuid,
    pub canonical_product_id: Uuid,
    pub link_type: LinkType,
    #[schema(example = 90)]
    pub confidence: i16,
    pub status: SuggestionStatus,
    pub created_at: String,
}

impl From<match_suggestion::Model> for SuggestionView {
    fn from(model: match_suggestion::Model) -> Self {
        Self {
            id: model.id,
            job_id: model.job_id,
            supplier_record_id: model.supplier_record_id,
            canonical_product_id: model.canonical_product_id,
            link_type: model.link_type,
            confidence: model.confidence,
            status: model.status,
            created_at: model.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<SuggestionView>,
}

/// Link created by confirming a suggestion
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MatchLinkView {
    pub id: Uuid,
    pub supplier_record_id: Uuid,
    pub canonical_product_id: Uuid,
    pub link_type: LinkType,
    pub origin: LinkOrigin,
    pub confidence: i16,
    pub created_by: String,
}

impl From<match_link::Model> for MatchLinkView {
    fn from(model: match_link::Model) -> Self {
        Self {
            id: model.id,
            supplier_record_id: model.supplier_record_id,
            canonical_product_id: model.canonical_product_id,
            link_type: model.link_type,
            origin: model.origin,
            confidence: model.confidence,
            created_by: model.created_by,
        }
    }
}

/// List pending suggestions, highest confidence first
#[utoipa::path(
    get,
    path = "/suggestions",
    params(ListSuggestionsQuery),
    responses(
        (status = 200, description = "Pending suggestions", body = SuggestionsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError)
    ),
    tag = "suggestions"
)]
pub async fn list_suggestions(
    State(state): State<AppState>,
    query: Result<Query<ListSuggestionsQuery>, QueryRejection>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let Query(params) = query?;
    let limit = page_limit(params.limit)?;

    let suggestions = SuggestionRepository::new(state.db.clone())
        .list_pending(params.owner_id, u64::from(limit))
        .await?;

    Ok(Json(SuggestionsResponse {
        suggestions: suggestions.into_iter().map(SuggestionView::from).collect(),
    }))
}

/// Confirm a suggestion into a manual match link
#[utoipa::path(
    post,
    path = "/suggestions/{id}/confirm",
    params(("id" = Uuid, Path, description = "Suggestion id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Manual link written", body = MatchLinkView),
        (status = 404, description = "Suggestion not found for this owner", body = ApiError),
        (status = 409, description = "Suggestion already reviewed", body = ApiError)
    ),
    tag = "suggestions"
)]
pub async fn confirm_suggestion(
    State(state): State<AppState>,
    Path(suggestion_id): Path<Uuid>,
    body: Result<Json<ReviewRequest>, JsonRejection>,
) -> Result<Json<MatchLinkView>, ApiError> {
    let Json(request) = body?;
    let reviewer = request.reviewed_by.as_deref().unwrap_or("manual-review");

    let link = SuggestionRepository::new(state.db.clone())
        .confirm(request.owner_id, suggestion_id, reviewer)
        .await?;

    Ok(Json(MatchLinkView::from(link)))
}

/// Reject a suggestion
#[utoipa::path(
    post,
    path = "/suggestions/{id}/reject",
    params(("id" = Uuid, Path, description = "Suggestion id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Suggestion rejected", body = SuggestionView),
        (status = 404, description = "Suggestion not found for this owner", body = ApiError),
        (status = 409, description = "Suggestion already reviewed", body = ApiError)
    ),
    tag = "suggestions"
)]
pub async fn reject_suggestion(
    State(state): State<AppState>,
    Path(suggestion_id): Path<Uuid>,
    body: Result<Json<ReviewRequest>, JsonRejection>,
) -> Result<Json<SuggestionView>, ApiError> {
    let Json(request) = body?;
    let suggestion = SuggestionRepository::new(state.db.clone())
        .reject(request.owner_id, suggestion_id)
        .await?;

    Ok(Json(SuggestionView::from(suggestion)))
}
