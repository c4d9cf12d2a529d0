//! Job Controller
//!
//! Sole writer of job rows. Every transition is a guarded `UPDATE` that
//! refuses terminal jobs, and chunk accounting is additionally guarded on the
//! cursor so a chunk is never counted twice.
//!
//! Methods that participate in a chunk commit take the connection explicitly
//! so the dispatcher can run them inside one transaction.

use chrono::Utc;
use metrics::counter;
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{ChunkReport, JobError};
use crate::models::job::{self, Column, Entity as Job, JobKind, JobStatus};
use crate::repositories::chunk_task;

/// Reason recorded on jobs cancelled through the API
pub const CANCELLED_REASON: &str = "cancelled";

/// Everything needed to persist a new job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: Uuid,
    pub kind: JobKind,
    pub source_descriptor: Option<JsonValue>,
    pub target_ids: Option<JsonValue>,
    pub options: JsonValue,
    /// Known (deletion) or estimated (import) item count
    pub total_items: u64,
    pub chunk_size: u64,
}

#[derive(Clone)]
pub struct JobController {
    db: DatabaseConnection,
}

impl JobController {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Persist a queued job together with its first chunk task.
    #[instrument(skip(self, new_job), fields(owner_id = %new_job.owner_id, kind = new_job.kind.as_str()))]
    pub async fn create(&self, new_job: NewJob) -> Result<job::Model, JobError> {
        if new_job.total_items == 0 {
            return Err(JobError::InvalidInput("input contains no items".to_string()));
        }
        if new_job.chunk_size == 0 {
            return Err(JobError::InvalidInput("chunk_size must be positive".to_string()));
        }

        let now = Utc::now().fixed_offset();
        let job_id = Uuid::new_v4();
        let active = job::ActiveModel {
            id: Set(job_id),
            owner_id: Set(new_job.owner_id),
            kind: Set(new_job.kind),
            status: Set(JobStatus::Queued),
            source_descriptor: Set(new_job.source_descriptor),
            target_ids: Set(new_job.target_ids),
            options: Set(new_job.options),
            total_items: Set(new_job.total_items as i64),
            processed_items: Set(0),
            matched_count: Set(0),
            new_count: Set(0),
            suggested_count: Set(0),
            error_count: Set(0),
            errors: Set(JsonValue::Array(Vec::new())),
            cursor: Set(0),
            retry_count: Set(0),
            last_error: Set(None),
            created_at: Set(now),
            started_at: Set(None),
            completed_at: Set(None),
            updated_at: Set(now),
        };

        let txn = self.db.begin().await?;
        let job = active.insert(&txn).await?;
        chunk_task::enqueue(&txn, job_id, new_job.kind, 0, new_job.chunk_size as i64).await?;
        txn.commit().await?;

        counter!("catalog_jobs_created_total", "kind" => new_job.kind.as_str()).increment(1);
        info!(
            job_id = %job.id,
            total_items = job.total_items,
            chunk_size = new_job.chunk_size,
            "Job created"
        );
        Ok(job)
    }

    pub async fn get<C: ConnectionTrait>(&self, conn: &C, job_id: Uuid) -> Result<job::Model, JobError> {
        Job::find_by_id(job_id)
            .one(conn)
            .await?
            .ok_or(JobError::NotFound(job_id))
    }

    /// Polling view; jobs of other owners are reported as missing.
    pub async fn status(&self, owner_id: Uuid, job_id: Uuid) -> Result<job::Model, JobError> {
        Job::find_by_id(job_id)
            .filter(Column::OwnerId.eq(owner_id))
            .one(&self.db)
            .await?
            .ok_or(JobError::NotFound(job_id))
    }

    /// Why a guarded update touched no row
    async fn rejection<C: ConnectionTrait>(&self, conn: &C, job_id: Uuid, offset: Option<i64>) -> JobError {
        match Job::find_by_id(job_id).one(conn).await {
            Ok(None) => JobError::NotFound(job_id),
            Ok(Some(job)) if job.status.is_terminal() => JobError::Terminal {
                job_id,
                status: job.status,
            },
            Ok(Some(_)) => JobError::AlreadyCounted {
                job_id,
                offset: offset.unwrap_or_default(),
            },
            Err(e) => JobError::Database(e),
        }
    }

    /// `queued -> processing`. Returns false when the job had already started.
    pub async fn begin_processing<C: ConnectionTrait>(&self, conn: &C, job_id: Uuid) -> Result<bool, JobError> {
        let now = Utc::now().fixed_offset();
        let result = Job::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Processing))
            .col_expr(Column::StartedAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Queued))
            .exec(conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Fold one chunk's results into the job.
    ///
    /// Guarded on `cursor == chunk_offset`. `processed_items` grows by the
    /// imported items only, while the cursor moves past every consumed
    /// position. Resets the retry budget and raises `total_items` if the
    /// estimate was too low.
    #[instrument(skip(self, conn, report), fields(job_id = %job_id, chunk_offset = chunk_offset))]
    pub async fn advance<C: ConnectionTrait>(
        &self,
        conn: &C,
        job_id: Uuid,
        chunk_offset: i64,
        report: &ChunkReport,
    ) -> Result<job::Model, JobError> {
        let job = Job::find_by_id(job_id)
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or(JobError::NotFound(job_id))?;

        if job.status.is_terminal() {
            return Err(JobError::Terminal {
                job_id,
                status: job.status,
            });
        }
        if job.cursor != chunk_offset {
            return Err(JobError::AlreadyCounted {
                job_id,
                offset: chunk_offset,
            });
        }

        let processed = job.processed_items + report.imported as i64;
        let cursor = chunk_offset + report.consumed as i64;
        let total = job.total_items.max(cursor).max(processed);
        let mut errors = job.errors.as_array().cloned().unwrap_or_default();
        errors.extend(
            report
                .errors
                .iter()
                .filter_map(|entry| serde_json::to_value(entry).ok()),
        );

        let result = Job::update_many()
            .col_expr(Column::ProcessedItems, Expr::value(processed))
            .col_expr(Column::TotalItems, Expr::value(total))
            .col_expr(
                Column::MatchedCount,
                Expr::value(job.matched_count + report.matched as i64),
            )
            .col_expr(Column::NewCount, Expr::value(job.new_count + report.new as i64))
            .col_expr(
                Column::SuggestedCount,
                Expr::value(job.suggested_count + report.suggested as i64),
            )
            .col_expr(
                Column::ErrorCount,
                Expr::value(job.error_count + report.errors.len() as i64),
            )
            .col_expr(Column::Errors, Expr::value(JsonValue::Array(errors)))
            .col_expr(Column::Cursor, Expr::value(cursor))
            .col_expr(Column::RetryCount, Expr::value(0))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Cursor.eq(chunk_offset))
            .filter(Column::Status.is_not_in(JobStatus::terminal()))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(self.rejection(conn, job_id, Some(chunk_offset)).await);
        }

        self.get(conn, job_id).await
    }

    /// Close a job whose input is exhausted.
    ///
    /// `completed` without errors, `completed_with_errors` if anything was
    /// processed, otherwise `failed`.
    pub async fn finalize<C: ConnectionTrait>(&self, conn: &C, job_id: Uuid) -> Result<JobStatus, JobError> {
        let job = self.get(conn, job_id).await?;
        if job.status.is_terminal() {
            return Err(JobError::Terminal {
                job_id,
                status: job.status,
            });
        }

        let status = if job.error_count == 0 {
            JobStatus::Completed
        } else if job.processed_items > 0 {
            JobStatus::CompletedWithErrors
        } else {
            JobStatus::Failed
        };

        let now = Utc::now().fixed_offset();
        let result = Job::update_many()
            .col_expr(Column::Status, Expr::value(status))
            .col_expr(Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.is_not_in(JobStatus::terminal()))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(self.rejection(conn, job_id, None).await);
        }

        counter!(
            "catalog_jobs_finished_total",
            "kind" => job.kind.as_str(),
            "status" => status.as_str()
        )
        .increment(1);
        info!(
            job_id = %job_id,
            status = status.as_str(),
            processed_items = job.processed_items,
            error_count = job.error_count,
            "Job finalized"
        );
        Ok(status)
    }

    /// Terminal failure, usable from any non-terminal state.
    pub async fn mark_failed<C: ConnectionTrait>(
        &self,
        conn: &C,
        job_id: Uuid,
        reason: &str,
    ) -> Result<(), JobError> {
        let now = Utc::now().fixed_offset();
        let result = Job::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Failed))
            .col_expr(Column::LastError, Expr::value(Some(reason.to_string())))
            .col_expr(Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.is_not_in(JobStatus::terminal()))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(self.rejection(conn, job_id, None).await);
        }

        counter!("catalog_jobs_finished_total", "status" => JobStatus::Failed.as_str()).increment(1);
        warn!(job_id = %job_id, reason = reason, "Job failed");
        Ok(())
    }

    /// Count a transient chunk failure; returns the new `retry_count`.
    pub async fn record_retry<C: ConnectionTrait>(
        &self,
        conn: &C,
        job_id: Uuid,
        error: &str,
    ) -> Result<i32, JobError> {
        let result = Job::update_many()
            .col_expr(Column::RetryCount, Expr::col(Column::RetryCount).add(1))
            .col_expr(Column::LastError, Expr::value(Some(error.to_string())))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.is_not_in(JobStatus::terminal()))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(self.rejection(conn, job_id, None).await);
        }

        Ok(self.get(conn, job_id).await?.retry_count)
    }

    /// External cancellation: fail the job and cancel its queued chunk tasks.
    ///
    /// A chunk already running finishes its rows but cannot commit progress.
    pub async fn cancel(&self, owner_id: Uuid, job_id: Uuid) -> Result<job::Model, JobError> {
        let job = self.status(owner_id, job_id).await?;
        if job.status.is_terminal() {
            return Err(JobError::Terminal {
                job_id,
                status: job.status,
            });
        }

        let txn = self.db.begin().await?;
        self.mark_failed(&txn, job_id, CANCELLED_REASON).await?;
        let cancelled = chunk_task::cancel_queued_for_job(&txn, job_id).await?;
        txn.commit().await?;

        info!(job_id = %job_id, owner_id = %owner_id, cancelled_tasks = cancelled, "Job cancelled");
        self.get(&self.db, job_id).await
    }
}
