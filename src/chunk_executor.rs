//! Chunk Executor
//!
//! Background worker pool that claims due chunk tasks and hands them to the
//! [`ChunkDispatcher`]. Chunks run as tokio tasks bounded by a semaphore;
//! each tick waits for its batch before claiming again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{gauge, histogram};
use sea_orm::{DatabaseConnection, DbErr};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::WorkerConfig;
use crate::dispatcher::ChunkDispatcher;
use crate::repositories::chunk_task;

/// Upper bound on claim rounds in [`ChunkExecutor::drain`]
const MAX_DRAIN_ROUNDS: usize = 10_000;

pub struct ChunkExecutor {
    db: DatabaseConnection,
    dispatcher: Arc<ChunkDispatcher>,
    config: WorkerConfig,
}

impl ChunkExecutor {
    pub fn new(db: DatabaseConnection, dispatcher: Arc<ChunkDispatcher>, config: WorkerConfig) -> Self {
        Self {
            db,
            dispatcher,
            config,
        }
    }

    /// Run the executor loop until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(config = ?self.config, "Starting chunk executor");
        let tick = Duration::from_millis(self.config.tick_ms);

        loop {
            let started = Instant::now();

            match self.claim_and_run().await {
                Ok(count) if count > 0 => debug!("Executed {} chunk tasks", count),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Error executing chunk tasks"),
            }

            let elapsed = started.elapsed();
            histogram!("catalog_executor_tick_duration_seconds").record(elapsed.as_secs_f64());

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Chunk executor shutdown requested");
                    break;
                }
                _ = sleep(tick.saturating_sub(elapsed)) => {}
            }
        }

        info!("Chunk executor stopped");
    }

    /// Claim one batch of due tasks and run it to completion.
    #[instrument(skip(self), fields(batch_size = self.config.claim_batch))]
    pub async fn claim_and_run(&self) -> Result<usize, DbErr> {
        let claimed = chunk_task::claim_due(&self.db, self.config.claim_batch).await?;
        let count = claimed.len();
        if count == 0 {
            return Ok(0);
        }

        debug!("Claimed {} chunk tasks", count);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let mut handles = Vec::with_capacity(count);
        for task in claimed {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let dispatcher = self.dispatcher.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                gauge!("catalog_executor_inflight").increment(1.0);
                let job_id = task.job_id;
                let offset = task.chunk_offset;
                if let Err(e) = dispatcher.run_chunk(task).await {
                    error!(job_id = %job_id, chunk_offset = offset, error = %e, "Chunk task failed");
                }
                gauge!("catalog_executor_inflight").decrement(1.0);
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Chunk worker panicked");
            }
        }

        Ok(count)
    }

    /// Run claim rounds until nothing is due. Returns the number of tasks executed.
    pub async fn drain(&self) -> Result<usize, DbErr> {
        let mut total = 0;
        for _ in 0..MAX_DRAIN_ROUNDS {
            let count = self.claim_and_run().await?;
            if count == 0 {
                break;
            }
            total += count;
        }
        Ok(total)
    }
}
