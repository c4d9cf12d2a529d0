//! Chunk Dispatcher
//!
//! Accepts new jobs and runs claimed chunk tasks: load the job, run the
//! import or deletion chunk, then either commit progress together with the
//! continuation task, reschedule the same task with backoff, or fail the job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rand::{Rng, thread_rng};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tokio::time::{sleep, timeout};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{AppConfig, RetryPolicyConfig};
use crate::jobs::{
    CascadingDeleter, ChunkFailure, ChunkReport, DeletionTarget, ImportChunkProcessor,
    JobController, JobError, JobOptions, NewJob,
};
use crate::models::chunk_task::{self, TaskStatus};
use crate::models::job::{self, JobKind, JobStatus};
use crate::repositories::chunk_task as tasks;
use crate::sources::{SourceDescriptor, SourceError, SourceRegistry};

/// What happened to a claimed chunk task
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// Progress committed and the next chunk enqueued
    Advanced { next_offset: i64 },
    /// Progress committed and the job closed
    Finalized(JobStatus),
    /// Transient failure; the same task runs again after `run_after`
    Retrying { retry_count: i32, run_after: DateTime<Utc> },
    /// Job failed (fatal error or retry budget spent)
    Failed,
    /// Job was terminal or the chunk had already been counted
    Skipped,
}

/// Heartbeat period for a running task: three beats per staleness window.
pub fn heartbeat_interval(stale_after_seconds: u64) -> Duration {
    Duration::from_millis(stale_after_seconds.saturating_mul(1000) / 3).max(Duration::from_millis(100))
}

/// Delay before retry number `retry_count` (1-based): `base * 2^(n-1)`,
/// capped at `max`, plus up to `jitter_factor` of itself.
pub fn retry_delay(policy: &RetryPolicyConfig, retry_count: i32) -> Duration {
    let exponent = retry_count.saturating_sub(1).clamp(0, 30);
    let backoff = (policy.base_seconds as f64 * 2_f64.powi(exponent)).min(policy.max_seconds as f64);
    let jitter_span = policy.jitter_factor * backoff;
    let jitter = if jitter_span > 0.0 {
        thread_rng().gen_range(0.0..jitter_span)
    } else {
        0.0
    };
    Duration::from_secs_f64(backoff + jitter)
}

pub struct ChunkDispatcher {
    db: DatabaseConnection,
    config: Arc<AppConfig>,
    controller: JobController,
    registry: Arc<SourceRegistry>,
    importer: ImportChunkProcessor,
    deleter: CascadingDeleter,
}

impl ChunkDispatcher {
    pub fn new(db: DatabaseConnection, config: Arc<AppConfig>, registry: Arc<SourceRegistry>) -> Self {
        Self {
            controller: JobController::new(db.clone()),
            importer: ImportChunkProcessor::new(db.clone(), registry.clone(), config.import.clone()),
            deleter: CascadingDeleter::new(db.clone(), config.deletion.clone()),
            db,
            config,
            registry,
        }
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    fn effective_chunk_size(&self, requested: Option<u32>, default: u32) -> Result<u32, JobError> {
        let size = requested.unwrap_or(default);
        let max = self.config.import.max_chunk_size;
        if size == 0 || size > max {
            return Err(JobError::InvalidInput(format!(
                "chunk_size must be between 1 and {}, got {}",
                max, size
            )));
        }
        Ok(size)
    }

    /// Validate the source, estimate its size and queue an import job.
    #[instrument(skip(self, descriptor, options), fields(owner_id = %owner_id, source_id = %descriptor.source_id))]
    pub async fn submit_import(
        &self,
        owner_id: Uuid,
        descriptor: SourceDescriptor,
        mut options: JobOptions,
    ) -> Result<job::Model, JobError> {
        let chunk_size = self.effective_chunk_size(options.chunk_size, self.config.import.chunk_size)?;
        let platform = descriptor.settings.platform();
        let adapter = self
            .registry
            .get(platform)
            .map_err(|_| JobError::UnknownPlatform(platform.to_string()))?;

        let fetch_timeout = self.config.import.fetch_timeout_seconds;
        let total = timeout(Duration::from_secs(fetch_timeout), adapter.count(&descriptor))
            .await
            .map_err(|_| JobError::Source {
                platform: platform.to_string(),
                source: SourceError::Timeout(fetch_timeout),
            })?
            .map_err(|source| JobError::Source {
                platform: platform.to_string(),
                source,
            })?;

        if total == 0 {
            return Err(JobError::InvalidInput("source contains no items".to_string()));
        }

        options.chunk_size = Some(chunk_size);
        let source_descriptor = serde_json::to_value(&descriptor)
            .map_err(|e| JobError::InvalidInput(format!("unserializable source: {}", e)))?;
        let options = serde_json::to_value(&options)
            .map_err(|e| JobError::InvalidInput(format!("unserializable options: {}", e)))?;

        self.controller
            .create(NewJob {
                owner_id,
                kind: JobKind::Import,
                source_descriptor: Some(source_descriptor),
                target_ids: None,
                options,
                total_items: total,
                chunk_size: u64::from(chunk_size),
            })
            .await
    }

    /// Queue a deletion job over an explicit target list.
    #[instrument(skip(self, targets, options), fields(owner_id = %owner_id, targets = targets.len()))]
    pub async fn submit_deletion(
        &self,
        owner_id: Uuid,
        targets: Vec<DeletionTarget>,
        mut options: JobOptions,
    ) -> Result<job::Model, JobError> {
        if targets.is_empty() {
            return Err(JobError::InvalidInput("no deletion targets".to_string()));
        }
        let chunk_size = self.effective_chunk_size(options.chunk_size, self.config.deletion.chunk_size)?;
        options.chunk_size = Some(chunk_size);

        let target_ids = serde_json::to_value(&targets)
            .map_err(|e| JobError::InvalidInput(format!("unserializable targets: {}", e)))?;
        let options = serde_json::to_value(&options)
            .map_err(|e| JobError::InvalidInput(format!("unserializable options: {}", e)))?;

        self.controller
            .create(NewJob {
                owner_id,
                kind: JobKind::Deletion,
                source_descriptor: None,
                target_ids: Some(target_ids),
                options,
                total_items: targets.len() as u64,
                chunk_size: u64::from(chunk_size),
            })
            .await
    }

    /// Execute one claimed chunk task to completion.
    #[instrument(skip(self, task), fields(job_id = %task.job_id, chunk_offset = task.chunk_offset, attempt = task.attempts))]
    pub async fn run_chunk(&self, task: chunk_task::Model) -> Result<ChunkOutcome, JobError> {
        let job = match self.controller.get(&self.db, task.job_id).await {
            Ok(job) => job,
            Err(JobError::NotFound(_)) => {
                tasks::complete(&self.db, &task, TaskStatus::Cancelled).await?;
                return Ok(ChunkOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        if job.status.is_terminal() {
            debug!(status = job.status.as_str(), "Job is terminal, dropping chunk task");
            tasks::complete(&self.db, &task, TaskStatus::Cancelled).await?;
            return Ok(ChunkOutcome::Skipped);
        }

        if job.cursor != task.chunk_offset {
            debug!(cursor = job.cursor, "Chunk already counted, dropping duplicate task");
            tasks::complete(&self.db, &task, TaskStatus::Done).await?;
            return Ok(ChunkOutcome::Skipped);
        }

        self.controller.begin_processing(&self.db, job.id).await?;

        let started = Instant::now();
        let heartbeat = self.spawn_heartbeat(&task);
        let result = match job.kind {
            JobKind::Import => self.importer.run(&job, task.chunk_offset, task.chunk_limit).await,
            JobKind::Deletion => self.deleter.run(&job, task.chunk_offset, task.chunk_limit).await,
        };
        drop(heartbeat);
        histogram!("catalog_chunk_duration_seconds", "kind" => job.kind.as_str())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(report) => self.commit_chunk(&job, &task, &report).await,
            Err(ChunkFailure::Transient(message)) => self.handle_transient(&job, &task, &message).await,
            Err(ChunkFailure::Fatal(message)) => self.handle_fatal(&job, &task, &message).await,
        }
    }

    /// Keep the claimed task's `updated_at` fresh while its chunk runs.
    /// Stops when the returned guard is dropped or the claim is lost.
    fn spawn_heartbeat(&self, task: &chunk_task::Model) -> DropGuard {
        let token = CancellationToken::new();
        let stop = token.clone();
        let db = self.db.clone();
        let task = task.clone();
        let interval = heartbeat_interval(self.config.worker.stale_after_seconds);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = sleep(interval) => match tasks::heartbeat(&db, &task).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(task_id = %task.id, "Chunk task was reclaimed while running");
                            break;
                        }
                        Err(e) => warn!(task_id = %task.id, error = %e, "Chunk heartbeat failed"),
                    },
                }
            }
        });

        token.drop_guard()
    }

    /// Advance the job, then enqueue the continuation or finalize, and close
    /// the task, all in one transaction.
    async fn commit_chunk(
        &self,
        job: &job::Model,
        task: &chunk_task::Model,
        report: &ChunkReport,
    ) -> Result<ChunkOutcome, JobError> {
        let txn = self.db.begin().await?;

        match self.controller.advance(&txn, job.id, task.chunk_offset, report).await {
            Ok(_) => {}
            Err(JobError::Terminal { status, .. }) => {
                txn.rollback().await?;
                info!(status = status.as_str(), "Job closed while chunk was running, progress discarded");
                tasks::complete(&self.db, task, TaskStatus::Cancelled).await?;
                return Ok(ChunkOutcome::Skipped);
            }
            Err(JobError::AlreadyCounted { .. }) => {
                txn.rollback().await?;
                tasks::complete(&self.db, task, TaskStatus::Done).await?;
                return Ok(ChunkOutcome::Skipped);
            }
            Err(e) => return Err(e),
        }

        let outcome = if report.has_more {
            tasks::enqueue(&txn, job.id, job.kind, report.next_offset, task.chunk_limit).await?;
            ChunkOutcome::Advanced {
                next_offset: report.next_offset,
            }
        } else {
            ChunkOutcome::Finalized(self.controller.finalize(&txn, job.id).await?)
        };

        if !tasks::complete(&txn, task, TaskStatus::Done).await? {
            debug!("Task was reclaimed while running, its new owner will find the chunk counted");
        }
        txn.commit().await?;

        debug!(?outcome, "Chunk committed");
        Ok(outcome)
    }

    async fn handle_transient(
        &self,
        job: &job::Model,
        task: &chunk_task::Model,
        message: &str,
    ) -> Result<ChunkOutcome, JobError> {
        let retry_count = match self.controller.record_retry(&self.db, job.id, message).await {
            Ok(count) => count,
            Err(JobError::Terminal { .. }) => {
                tasks::complete(&self.db, task, TaskStatus::Cancelled).await?;
                return Ok(ChunkOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let policy = &self.config.retry_policy;
        if retry_count < policy.max_retries as i32 {
            let delay = retry_delay(policy, retry_count);
            let run_after = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0));
            if !tasks::reschedule(&self.db, task, run_after.fixed_offset()).await? {
                warn!("Task was reclaimed while running, leaving it to its new owner");
            }

            counter!("catalog_chunk_retries_total", "kind" => job.kind.as_str()).increment(1);
            warn!(
                retry_count = retry_count,
                delay_seconds = delay.as_secs_f64(),
                error = message,
                "Transient chunk failure, rescheduled"
            );
            return Ok(ChunkOutcome::Retrying {
                retry_count,
                run_after,
            });
        }

        let reason = format!("retries exhausted after {} attempts: {}", retry_count, message);
        self.fail_job(job, task, &reason).await
    }

    async fn handle_fatal(
        &self,
        job: &job::Model,
        task: &chunk_task::Model,
        message: &str,
    ) -> Result<ChunkOutcome, JobError> {
        warn!(error = message, "Fatal chunk failure");
        self.fail_job(job, task, message).await
    }

    async fn fail_job(
        &self,
        job: &job::Model,
        task: &chunk_task::Model,
        reason: &str,
    ) -> Result<ChunkOutcome, JobError> {
        let txn = self.db.begin().await?;
        match self.controller.mark_failed(&txn, job.id, reason).await {
            Ok(()) => {
                tasks::complete(&txn, task, TaskStatus::Done).await?;
                txn.commit().await?;
                Ok(ChunkOutcome::Failed)
            }
            Err(JobError::Terminal { .. }) => {
                txn.rollback().await?;
                tasks::complete(&self.db, task, TaskStatus::Cancelled).await?;
                Ok(ChunkOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }
}
