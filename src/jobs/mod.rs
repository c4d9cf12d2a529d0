//! # Jobs
//!
//! Shared job types, the [`JobController`] that owns job state, and the two
//! chunk processors: import and cascading deletion.

use std::collections::BTreeMap;

use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::job::{ErrorEntry, JobStatus};
use crate::sources::SourceError;

pub mod cascade;
pub mod controller;
pub mod import_chunk;

pub use cascade::CascadingDeleter;
pub use controller::{JobController, NewJob};
pub use import_chunk::ImportChunkProcessor;

/// Errors raised by job lifecycle operations
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {job_id} is already {}", status.as_str())]
    Terminal { job_id: Uuid, status: JobStatus },

    #[error("chunk at offset {offset} of job {job_id} was already counted")]
    AlreadyCounted { job_id: Uuid, offset: i64 },

    #[error("source {platform} failed: {source}")]
    Source {
        platform: String,
        #[source]
        source: SourceError,
    },

    #[error("unknown source platform '{0}'")]
    UnknownPlatform(String),

    #[error(transparent)]
    Database(#[from] DbErr),
}

fn default_auto_link() -> bool {
    true
}

/// Per-job options, persisted with the job so every chunk sees the same settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobOptions {
    /// Rows (or deletion targets) per chunk; defaults to the configured size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = 50)]
    pub chunk_size: Option<u32>,

    /// When false every match candidate becomes a suggestion
    #[serde(default = "default_auto_link")]
    pub auto_link: bool,

    /// Product field -> source column overrides, e.g. `{"name": "Kurztext"}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_mapping: BTreeMap<String, String>,

    /// Currency used when a row carries neither a code nor a symbol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "EUR")]
    pub default_currency: Option<String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            chunk_size: None,
            auto_link: true,
            field_mapping: BTreeMap::new(),
            default_currency: None,
        }
    }
}

impl JobOptions {
    /// Decode options persisted on a job row; unknown or broken blobs fall back to defaults.
    pub fn from_json(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Entity kinds a deletion job can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetEntity {
    SupplierRecord,
    CanonicalProduct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeletionTarget {
    pub entity: TargetEntity,
    pub id: Uuid,
}

/// Outcome of one chunk invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChunkReport {
    /// Input positions consumed, successful or not; moves the cursor
    pub consumed: u64,
    /// Rows persisted (imports) or targets removed (deletions); counted as progress
    pub imported: u64,
    pub matched: u64,
    pub new: u64,
    pub suggested: u64,
    pub errors: Vec<ErrorEntry>,
    pub has_more: bool,
    pub next_offset: i64,
}

/// Chunk-level failure; row errors never surface here
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChunkFailure {
    /// Retried with backoff until the retry budget is spent
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
}

impl From<SourceError> for ChunkFailure {
    fn from(error: SourceError) -> Self {
        if error.is_transient() {
            ChunkFailure::Transient(error.to_string())
        } else {
            ChunkFailure::Fatal(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_default_to_auto_link() {
        let options: JobOptions = serde_json::from_value(json!({})).unwrap();
        assert!(options.auto_link);
        assert_eq!(options.chunk_size, None);

        let options = JobOptions::from_json(&json!({"auto_link": false, "chunk_size": 10}));
        assert!(!options.auto_link);
        assert_eq!(options.chunk_size, Some(10));

        assert_eq!(JobOptions::from_json(&json!("garbage")), JobOptions::default());
    }

    #[test]
    fn deletion_target_wire_shape() {
        let target: DeletionTarget = serde_json::from_value(json!({
            "entity": "canonical_product",
            "id": "6f1c1c0e-5d57-4bd4-9a55-0c8e1b1f2f10"
        }))
        .unwrap();
        assert_eq!(target.entity, TargetEntity::CanonicalProduct);
    }

    #[test]
    fn source_errors_classify_into_chunk_failures() {
        assert!(matches!(
            ChunkFailure::from(SourceError::Connection("reset".into())),
            ChunkFailure::Transient(_)
        ));
        assert!(matches!(
            ChunkFailure::from(SourceError::Auth("401".into())),
            ChunkFailure::Fatal(_)
        ));
    }
}
