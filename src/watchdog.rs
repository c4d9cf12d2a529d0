//! # Stall Watchdog
//!
//! Background task that recovers work a dead worker left behind. Each tick it
//! re-queues chunk tasks stuck in `running` past the staleness window, and
//! re-drives active jobs whose heartbeat went stale with no open task by
//! queueing the chunk at their persisted cursor.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::counter;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AppConfig;
use crate::jobs::JobOptions;
use crate::models::job::{Column as JobColumn, Entity as Job, JobKind, JobStatus};
use crate::repositories::chunk_task;

/// Stale jobs inspected per tick
const DEFAULT_BATCH_SIZE: u64 = 128;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchdogStats {
    pub tasks_requeued: u64,
    pub jobs_redriven: u64,
}

pub struct StallWatchdog {
    config: Arc<AppConfig>,
    db: DatabaseConnection,
    batch_size: u64,
}

impl StallWatchdog {
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection) -> Self {
        Self {
            config,
            db,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Run the watchdog loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting stall watchdog");
        let tick_interval = TokioDuration::from_secs(self.config.worker.watchdog_tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Stall watchdog shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Watchdog tick failed");
                    }
                }
            }
        }

        info!("Stall watchdog stopped");
    }

    fn default_chunk_size(&self, kind: JobKind) -> u32 {
        match kind {
            JobKind::Import => self.config.import.chunk_size,
            JobKind::Deletion => self.config.deletion.chunk_size,
        }
    }

    pub async fn tick(&self) -> Result<WatchdogStats, DbErr> {
        let cutoff = (Utc::now() - Duration::seconds(self.config.worker.stale_after_seconds as i64))
            .fixed_offset();
        let mut stats = WatchdogStats {
            tasks_requeued: chunk_task::requeue_stale_running(&self.db, cutoff).await?,
            ..WatchdogStats::default()
        };

        if stats.tasks_requeued > 0 {
            warn!(count = stats.tasks_requeued, "Re-queued chunk tasks abandoned mid-run");
        }

        let stale_jobs = Job::find()
            .filter(JobColumn::Status.is_in(JobStatus::active()))
            .filter(JobColumn::UpdatedAt.lt(cutoff))
            .order_by_asc(JobColumn::UpdatedAt)
            .limit(self.batch_size)
            .all(&self.db)
            .await?;

        for job in stale_jobs {
            if chunk_task::has_open_task(&self.db, job.id).await? {
                continue;
            }

            let chunk_size = JobOptions::from_json(&job.options)
                .chunk_size
                .unwrap_or_else(|| self.default_chunk_size(job.kind));
            chunk_task::requeue_at(&self.db, job.id, job.kind, job.cursor, i64::from(chunk_size)).await?;

            stats.jobs_redriven += 1;
            counter!("catalog_watchdog_redrives_total", "kind" => job.kind.as_str()).increment(1);
            warn!(
                job_id = %job.id,
                cursor = job.cursor,
                status = job.status.as_str(),
                "Re-drove stalled job from its cursor"
            );
        }

        debug!(
            tasks_requeued = stats.tasks_requeued,
            jobs_redriven = stats.jobs_redriven,
            "Watchdog tick complete"
        );
        Ok(stats)
    }
}
