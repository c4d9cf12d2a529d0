//! # ChunkTask Repository
//!
//! Persisted continuations. Functions take any connection so they can run
//! inside the transaction that advances the job.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::prelude::Expr;
use sea_orm::sea_query::{LockBehavior, LockType, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::models::chunk_task::{self, ActiveModel, Column, Entity as ChunkTask, Model, TaskStatus};
use crate::models::job::JobKind;

fn task_model(
    job_id: Uuid,
    kind: JobKind,
    offset: i64,
    limit: i64,
    run_after: DateTime<FixedOffset>,
) -> ActiveModel {
    let now = Utc::now().fixed_offset();
    ActiveModel {
        id: Set(Uuid::new_v4()),
        job_id: Set(job_id),
        kind: Set(kind),
        chunk_offset: Set(offset),
        chunk_limit: Set(limit),
        status: Set(TaskStatus::Queued),
        attempts: Set(0),
        run_after: Set(run_after),
        claimed_by: Set(None),
        started_at: Set(None),
        finished_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

/// Insert the task for `(job_id, offset)` unless one already exists.
///
/// Returns whether a row was inserted.
pub async fn enqueue<C: ConnectionTrait>(
    conn: &C,
    job_id: Uuid,
    kind: JobKind,
    offset: i64,
    limit: i64,
) -> Result<bool, DbErr> {
    let inserted = ChunkTask::insert(task_model(
        job_id,
        kind,
        offset,
        limit,
        Utc::now().fixed_offset(),
    ))
    .on_conflict(
        OnConflict::columns([Column::JobId, Column::ChunkOffset])
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await?;

    Ok(inserted > 0)
}

/// Insert or reset the task for `(job_id, offset)` back to `queued`, due now.
pub async fn requeue_at<C: ConnectionTrait>(
    conn: &C,
    job_id: Uuid,
    kind: JobKind,
    offset: i64,
    limit: i64,
) -> Result<(), DbErr> {
    ChunkTask::insert(task_model(
        job_id,
        kind,
        offset,
        limit,
        Utc::now().fixed_offset(),
    ))
    .on_conflict(
        OnConflict::columns([Column::JobId, Column::ChunkOffset])
            .update_columns([
                Column::Status,
                Column::RunAfter,
                Column::ClaimedBy,
                Column::UpdatedAt,
            ])
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await?;
    Ok(())
}

/// Atomically claim up to `batch` due tasks for one worker.
///
/// Candidate ids are selected with `FOR UPDATE SKIP LOCKED` where the backend
/// supports it; the claim itself is a guarded `UPDATE` stamping a fresh claim
/// token, and only rows carrying that token are returned.
pub async fn claim_due(db: &DatabaseConnection, batch: u64) -> Result<Vec<Model>, DbErr> {
    let now = Utc::now().fixed_offset();
    let token = Uuid::new_v4();
    let txn = db.begin().await?;

    let due_ids: Vec<Uuid> = ChunkTask::find()
        .select_only()
        .column(Column::Id)
        .filter(Column::Status.eq(TaskStatus::Queued))
        .filter(Column::RunAfter.lte(now))
        .order_by_asc(Column::RunAfter)
        .order_by_asc(Column::CreatedAt)
        .limit(batch)
        .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
        .into_tuple()
        .all(&txn)
        .await?;

    if due_ids.is_empty() {
        txn.commit().await?;
        return Ok(Vec::new());
    }

    ChunkTask::update_many()
        .col_expr(Column::Status, Expr::value(TaskStatus::Running))
        .col_expr(Column::ClaimedBy, Expr::value(Some(token)))
        .col_expr(Column::Attempts, Expr::col(Column::Attempts).add(1))
        .col_expr(Column::StartedAt, Expr::value(Some(now)))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.is_in(due_ids))
        .filter(Column::Status.eq(TaskStatus::Queued))
        .exec(&txn)
        .await?;

    let claimed = ChunkTask::find()
        .filter(Column::ClaimedBy.eq(token))
        .filter(Column::Status.eq(TaskStatus::Running))
        .order_by_asc(Column::RunAfter)
        .all(&txn)
        .await?;

    txn.commit().await?;
    Ok(claimed)
}

/// Matches the task only while it still carries the claim it was handed out with.
fn still_claimed(task: &Model) -> Condition {
    let claim = match task.claimed_by {
        Some(token) => Column::ClaimedBy.eq(token),
        None => Column::ClaimedBy.is_null(),
    };
    Condition::all().add(Column::Id.eq(task.id)).add(claim)
}

/// Refresh a running task's heartbeat.
///
/// Returns `false` once the task was re-queued or claimed by another worker.
pub async fn heartbeat<C: ConnectionTrait>(conn: &C, task: &Model) -> Result<bool, DbErr> {
    let result = ChunkTask::update_many()
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(still_claimed(task))
        .filter(Column::Status.eq(TaskStatus::Running))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Put a claimed task back in the queue, not due before `run_after`.
///
/// A no-op returning `false` if the claim was lost.
pub async fn reschedule<C: ConnectionTrait>(
    conn: &C,
    task: &Model,
    run_after: DateTime<FixedOffset>,
) -> Result<bool, DbErr> {
    let result = ChunkTask::update_many()
        .col_expr(Column::Status, Expr::value(TaskStatus::Queued))
        .col_expr(Column::RunAfter, Expr::value(run_after))
        .col_expr(Column::ClaimedBy, Expr::value(Option::<Uuid>::None))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(still_claimed(task))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Close a task as `done` or `cancelled`.
///
/// A no-op returning `false` if the claim was lost.
pub async fn complete<C: ConnectionTrait>(
    conn: &C,
    task: &Model,
    status: TaskStatus,
) -> Result<bool, DbErr> {
    let now = Utc::now().fixed_offset();
    let result = ChunkTask::update_many()
        .col_expr(Column::Status, Expr::value(status))
        .col_expr(Column::FinishedAt, Expr::value(Some(now)))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(still_claimed(task))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Re-queue tasks a worker claimed before `cutoff` and never finished.
pub async fn requeue_stale_running<C: ConnectionTrait>(
    conn: &C,
    cutoff: DateTime<FixedOffset>,
) -> Result<u64, DbErr> {
    let now = Utc::now().fixed_offset();
    let result = ChunkTask::update_many()
        .col_expr(Column::Status, Expr::value(TaskStatus::Queued))
        .col_expr(Column::ClaimedBy, Expr::value(Option::<Uuid>::None))
        .col_expr(Column::RunAfter, Expr::value(now))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Status.eq(TaskStatus::Running))
        .filter(Column::UpdatedAt.lt(cutoff))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Cancel every queued task of a job.
pub async fn cancel_queued_for_job<C: ConnectionTrait>(conn: &C, job_id: Uuid) -> Result<u64, DbErr> {
    let now = Utc::now().fixed_offset();
    let result = ChunkTask::update_many()
        .col_expr(Column::Status, Expr::value(TaskStatus::Cancelled))
        .col_expr(Column::FinishedAt, Expr::value(Some(now)))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::JobId.eq(job_id))
        .filter(Column::Status.eq(TaskStatus::Queued))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Whether the job has a queued or running task.
pub async fn has_open_task<C: ConnectionTrait>(conn: &C, job_id: Uuid) -> Result<bool, DbErr> {
    let open = ChunkTask::find()
        .filter(Column::JobId.eq(job_id))
        .filter(Column::Status.is_in([TaskStatus::Queued, TaskStatus::Running]))
        .count(conn)
        .await?;
    Ok(open > 0)
}

pub async fn list_for_job<C: ConnectionTrait>(
    conn: &C,
    job_id: Uuid,
) -> Result<Vec<chunk_task::Model>, DbErr> {
    ChunkTask::find()
        .filter(Column::JobId.eq(job_id))
        .order_by_asc(Column::ChunkOffset)
        .all(conn)
        .await
}
