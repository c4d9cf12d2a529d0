//! Import chunk processor
//!
//! Fetches one page from the job's source, then runs every row through
//! transform, match and upsert. Row failures are collected into the chunk
//! report; only a source failure or a lost database aborts the chunk.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use sea_orm::{DatabaseConnection, DbErr};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::{ChunkFailure, ChunkReport, JobOptions};
use crate::config::ImportConfig;
use crate::error::is_connection_error;
use crate::models::job::{self, ErrorEntry, ErrorKind};
use crate::models::match_link::LinkType;
use crate::pipeline::{
    CandidateWindow, EntityMatcher, MatchDecision, MatchPolicy, RowTransformer, UpsertOutcome,
    UpsertResult, UpsertScope, UpsertWriter,
};
use crate::sources::{SourceDescriptor, SourceError, SourceRegistry};

const FALLBACK_CURRENCY: &str = "EUR";

pub struct ImportChunkProcessor {
    db: DatabaseConnection,
    registry: Arc<SourceRegistry>,
    config: ImportConfig,
}

enum RowFailure {
    Timeout,
    Database(DbErr),
}

impl ImportChunkProcessor {
    pub fn new(db: DatabaseConnection, registry: Arc<SourceRegistry>, config: ImportConfig) -> Self {
        Self {
            db,
            registry,
            config,
        }
    }

    fn descriptor(job: &job::Model) -> Result<SourceDescriptor, ChunkFailure> {
        let raw = job
            .source_descriptor
            .clone()
            .ok_or_else(|| ChunkFailure::Fatal("import job has no source descriptor".to_string()))?;
        serde_json::from_value(raw)
            .map_err(|e| ChunkFailure::Fatal(format!("unreadable source descriptor: {}", e)))
    }

    /// Process rows `[offset, offset + limit)` of the job's source.
    #[instrument(skip(self, job), fields(job_id = %job.id, owner_id = %job.owner_id, chunk_offset = offset))]
    pub async fn run(&self, job: &job::Model, offset: i64, limit: i64) -> Result<ChunkReport, ChunkFailure> {
        let descriptor = Self::descriptor(job)?;
        let platform = descriptor.settings.platform();
        let adapter = self
            .registry
            .get(platform)
            .map_err(|e| ChunkFailure::Fatal(e.to_string()))?;

        let fetch_timeout = self.config.fetch_timeout_seconds;
        let page = timeout(
            Duration::from_secs(fetch_timeout),
            adapter.fetch_page(&descriptor, offset.max(0) as u64, limit.max(1) as u64),
        )
        .await
        .map_err(|_| ChunkFailure::from(SourceError::Timeout(fetch_timeout)))?
        .map_err(|e| {
            warn!(platform = platform, error = %e, "Source page fetch failed");
            ChunkFailure::from(e)
        })?;

        let options = JobOptions::from_json(&job.options);
        let transformer = RowTransformer::new(
            &options.field_mapping,
            options.default_currency.as_deref().unwrap_or(FALLBACK_CURRENCY),
        );
        let matcher = EntityMatcher::new(MatchPolicy::from_config(&self.config, options.auto_link));
        let writer = UpsertWriter::new(self.db.clone());
        let scope = UpsertScope {
            owner_id: job.owner_id,
            source_id: &descriptor.source_id,
            job_id: job.id,
        };

        let mut window = CandidateWindow::load(&self.db, job.owner_id, self.config.candidate_window)
            .await
            .map_err(|e| ChunkFailure::Transient(format!("candidate window load failed: {}", e)))?;

        let mut report = ChunkReport::default();
        for malformed in &page.malformed {
            report.errors.push(ErrorEntry::new(
                format!("row {}", malformed.position),
                ErrorKind::Parsing,
                malformed.message.clone(),
            ));
        }

        let row_timeout = Duration::from_millis(self.config.row_timeout_ms);
        for (index, raw) in page.rows.iter().enumerate() {
            let position = offset + index as i64;

            let row = match transformer.transform(raw) {
                Ok(row) => row,
                Err(e) => {
                    let reference = transformer
                        .reference_hint(raw)
                        .unwrap_or_else(|| format!("row {}", position));
                    debug!(reference = %reference, error = %e, "Row rejected");
                    report.errors.push(ErrorEntry::new(reference, e.kind(), e.to_string()));
                    continue;
                }
            };

            let outcome = timeout(row_timeout, async {
                let candidate = matcher.find_match(&self.db, job.owner_id, &row, &window).await?;
                let decision = matcher.decide(candidate);
                writer.upsert(scope, &row, decision).await.map(|r| (decision, r))
            })
            .await
            .map_err(|_| RowFailure::Timeout)
            .and_then(|r| r.map_err(RowFailure::Database));

            match outcome {
                Ok((decision, result)) => {
                    record_outcome(&mut report, &decision, &result);
                    if let Some(created) = &result.created {
                        window.push_front(created);
                    }
                    if let Some(released) = result.released {
                        window.remove(released);
                    }
                }
                Err(RowFailure::Timeout) => {
                    report.errors.push(ErrorEntry::new(
                        row.external_reference.clone(),
                        ErrorKind::Timeout,
                        format!("row exceeded {}ms", self.config.row_timeout_ms),
                    ));
                }
                Err(RowFailure::Database(e)) if is_connection_error(&e) => {
                    return Err(ChunkFailure::Transient(format!("database unavailable: {}", e)));
                }
                Err(RowFailure::Database(e)) => {
                    warn!(reference = %row.external_reference, error = %e, "Row write failed");
                    report.errors.push(ErrorEntry::new(
                        row.external_reference.clone(),
                        ErrorKind::Database,
                        e.to_string(),
                    ));
                }
            }
        }

        let consumed = page.consumed();
        report.consumed = consumed;
        // An empty page cannot advance the cursor, so it ends the input
        report.has_more = page.has_more && consumed > 0;
        report.next_offset = offset + consumed as i64;

        counter!("catalog_rows_processed_total").increment(consumed);
        info!(
            rows = consumed,
            imported = report.imported,
            matched = report.matched,
            new = report.new,
            suggested = report.suggested,
            errors = report.errors.len(),
            has_more = report.has_more,
            "Import chunk processed"
        );
        Ok(report)
    }
}

fn record_outcome(report: &mut ChunkReport, decision: &MatchDecision, result: &UpsertResult) {
    report.imported += 1;
    let matched_type = match decision {
        MatchDecision::AutoLink(m) | MatchDecision::Suggest(m) => m.link_type,
        MatchDecision::NoMatch => LinkType::ExactId,
    };
    let (outcome, link_type) = match result.outcome {
        UpsertOutcome::Linked => {
            report.matched += 1;
            ("linked", matched_type)
        }
        UpsertOutcome::Kept => {
            report.matched += 1;
            ("kept", LinkType::ExactId)
        }
        UpsertOutcome::Created => {
            report.new += 1;
            ("created", LinkType::ExactId)
        }
        UpsertOutcome::Suggested => {
            report.suggested += 1;
            ("suggested", matched_type)
        }
    };

    counter!(
        "catalog_match_outcomes_total",
        "outcome" => outcome,
        "link_type" => link_type.as_str()
    )
    .increment(1);
}
