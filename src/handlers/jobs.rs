//! # Jobs API Handlers
//!
//! Submit import and deletion jobs, poll their progress, list and cancel them.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::cursor::{decode_cursor, encode_cursor};
use crate::error::ApiError;
use crate::handlers::types::{PaginatedResponse, page_limit};
use crate::jobs::{DeletionTarget, JobOptions};
use crate::models::job::{self, ErrorEntry, JobKind, JobStatus};
use crate::repositories::{JobListFilter, JobRepository};
use crate::server::AppState;
use crate::sources::SourceDescriptor;

/// Request body for `POST /import-jobs`
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateImportJobRequest {
    pub owner_id: Uuid,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub options: JobOptions,
}

/// Request body for `POST /deletion-jobs`
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDeletionJobRequest {
    pub owner_id: Uuid,
    pub targets: Vec<DeletionTarget>,
    #[serde(default)]
    pub options: JobOptions,
}

/// Response for an accepted job
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobAccepted {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total_items: i64,
}

/// Owner scope carried on every job read
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OwnerQuery {
    /// Owner the job belongs to
    pub owner_id: Uuid,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsQuery {
    pub owner_id: Uuid,
    /// Filter by job status
    pub status: Option<JobStatus>,
    /// Filter by job kind
    pub kind: Option<JobKind>,
    /// Maximum number of jobs to return (default: 50, max: 100)
    pub limit: Option<u32>,
    /// Opaque cursor for pagination
    pub cursor: Option<String>,
}

/// Progress view of a job
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobStatusView {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub processed_items: i64,
    pub total_items: i64,
    pub matched: i64,
    pub new: i64,
    pub suggested: i64,
    pub error_count: i64,
    pub errors: Vec<ErrorEntry>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    /// RFC 3339 timestamps
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<job::Model> for JobStatusView {
    fn from(model: job::Model) -> Self {
        Self {
            errors: model.error_entries(),
            id: model.id,
            kind: model.kind,
            status: model.status,
            processed_items: model.processed_items,
            total_items: model.total_items,
            matched: model.matched_count,
            new: model.new_count,
            suggested: model.suggested_count,
            error_count: model.error_count,
            retry_count: model.retry_count,
            last_error: model.last_error,
            created_at: model.created_at.to_rfc3339(),
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            completed_at: model.completed_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Queue an import job
#[utoipa::path(
    post,
    path = "/import-jobs",
    request_body = CreateImportJobRequest,
    responses(
        (status = 202, description = "Import job accepted", body = JobAccepted),
        (status = 400, description = "Invalid source or options", body = ApiError),
        (status = 502, description = "Source could not be read", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn create_import_job(
    State(state): State<AppState>,
    body: Result<Json<CreateImportJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let Json(request) = body?;
    let job = state
        .dispatcher
        .submit_import(request.owner_id, request.source, request.options)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id: job.id,
            status: job.status,
            total_items: job.total_items,
        }),
    ))
}

/// Queue a cascading deletion job
#[utoipa::path(
    post,
    path = "/deletion-jobs",
    request_body = CreateDeletionJobRequest,
    responses(
        (status = 202, description = "Deletion job accepted", body = JobAccepted),
        (status = 400, description = "Empty target list or invalid options", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn create_deletion_job(
    State(state): State<AppState>,
    body: Result<Json<CreateDeletionJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let Json(request) = body?;
    let job = state
        .dispatcher
        .submit_deletion(request.owner_id, request.targets, request.options)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id: job.id,
            status: job.status,
            total_items: job.total_items,
        }),
    ))
}

/// Poll a job's progress
#[utoipa::path(
    get,
    path = "/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job id"),
        OwnerQuery
    ),
    responses(
        (status = 200, description = "Job progress", body = JobStatusView),
        (status = 404, description = "Job not found for this owner", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<Json<JobStatusView>, ApiError> {
    let Query(query) = query?;
    let job = JobRepository::new(state.db.clone())
        .find_for_owner(query.owner_id, job_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Job not found"))?;

    Ok(Json(JobStatusView::from(job)))
}

/// List an owner's jobs, newest first
#[utoipa::path(
    get,
    path = "/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Page of jobs", body = PaginatedResponse<JobStatusView>),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<Json<PaginatedResponse<JobStatusView>>, ApiError> {
    let Query(params) = query?;

    let limit = page_limit(params.limit)?;
    let cursor = params.cursor.as_deref().map(decode_cursor).transpose()?;
    let filter = JobListFilter {
        status: params.status,
        kind: params.kind,
        cursor,
    };

    let jobs = JobRepository::new(state.db.clone())
        .list_for_owner(params.owner_id, filter, u64::from(limit))
        .await?;

    Ok(Json(PaginatedResponse::from_overfetched(
        jobs,
        limit,
        |job| encode_cursor(&job.created_at.with_timezone(&Utc), &job.id),
        JobStatusView::from,
    )))
}

/// Cancel a job; chunks already running finish but commit nothing
#[utoipa::path(
    post,
    path = "/jobs/{id}/cancel",
    params(
        ("id" = Uuid, Path, description = "Job id"),
        OwnerQuery
    ),
    responses(
        (status = 200, description = "Job cancelled", body = JobStatusView),
        (status = 404, description = "Job not found for this owner", body = ApiError),
        (status = 409, description = "Job already finished", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<Json<JobStatusView>, ApiError> {
    let Query(query) = query?;
    let job = state
        .dispatcher
        .controller()
        .cancel(query.owner_id, job_id)
        .await?;

    Ok(Json(JobStatusView::from(job)))
}
