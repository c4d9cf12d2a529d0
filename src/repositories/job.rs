//! # Job Repository
//!
//! Owner-scoped reads over the jobs table. State transitions live in
//! [`crate::jobs::JobController`].

use axum::http::StatusCode;
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use uuid::Uuid;

use crate::cursor::JobCursor;
use crate::error::ApiError;
use crate::models::job::{Column, Entity, JobKind, JobStatus, Model};

/// Filters for listing jobs
#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub cursor: Option<JobCursor>,
}

/// Repository for job reads
pub struct JobRepository {
    db: DatabaseConnection,
}

impl JobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Find a job by id, only if it belongs to `owner_id`
    pub async fn find_for_owner(&self, owner_id: Uuid, job_id: Uuid) -> Result<Option<Model>, ApiError> {
        Entity::find_by_id(job_id)
            .filter(Column::OwnerId.eq(owner_id))
            .one(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to find job: {}", e);
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Failed to find job",
                )
            })
    }

    /// List an owner's jobs newest first, keyset-paginated on `(created_at, id)`.
    ///
    /// Fetches `limit + 1` rows so the caller can tell whether another page exists.
    pub async fn list_for_owner(
        &self,
        owner_id: Uuid,
        filter: JobListFilter,
        limit: u64,
    ) -> Result<Vec<Model>, ApiError> {
        let mut query = Entity::find()
            .filter(Column::OwnerId.eq(owner_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id);

        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status));
        }

        if let Some(kind) = filter.kind {
            query = query.filter(Column::Kind.eq(kind));
        }

        if let Some(cursor) = filter.cursor {
            let created_at = cursor.created_at.fixed_offset();
            query = query.filter(
                Condition::any()
                    .add(Column::CreatedAt.lt(created_at))
                    .add(
                        Condition::all()
                            .add(Column::CreatedAt.eq(created_at))
                            .add(Column::Id.lt(cursor.id)),
                    ),
            );
        }

        query
            .limit(limit + 1)
            .all(&self.db)
            .await
            .map_err(|e| {
                tracing::error!("Failed to list jobs: {}", e);
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Failed to list jobs",
                )
            })
    }
}
