//! Job entity model
//!
//! One row per import or deletion run. The row is the only state that
//! survives between chunks: cursor, counters, retry budget and errors.

use chrono::{DateTime, Utc};
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

/// Kind of work a job performs. Also stamped on its chunk tasks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    #[sea_orm(string_value = "import")]
    Import,
    #[sea_orm(string_value = "deletion")]
    Deletion,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::Deletion => "deletion",
        }
    }
}

/// Lifecycle status of a job.
///
/// `queued -> processing -> {completed, completed_with_errors, failed}`;
/// `queued -> failed` on cancellation or a fatal error before the first chunk.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "completed_with_errors")]
    CompletedWithErrors,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl JobStatus {
    /// Terminal statuses accept no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Failed
        )
    }

    pub fn terminal() -> [JobStatus; 3] {
        [
            JobStatus::Completed,
            JobStatus::CompletedWithErrors,
            JobStatus::Failed,
        ]
    }

    pub fn active() -> [JobStatus; 2] {
        [JobStatus::Queued, JobStatus::Processing]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
        }
    }
}

/// Category of a row-level or item-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parsing,
    Validation,
    Database,
    Timeout,
    Connection,
}

/// One retained error, kept with enough context for manual retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorEntry {
    /// External reference of the row, or the id of the deletion target
    pub reference: String,
    pub kind: ErrorKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn new(reference: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            kind,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub owner_id: Uuid,

    pub kind: JobKind,

    pub status: JobStatus,

    /// Platform and connection settings for import jobs
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub source_descriptor: Option<JsonValue>,

    /// Explicit deletion targets for deletion jobs
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub target_ids: Option<JsonValue>,

    #[sea_orm(column_type = "JsonBinary")]
    pub options: JsonValue,

    pub total_items: i64,

    pub processed_items: i64,

    pub matched_count: i64,

    pub new_count: i64,

    pub suggested_count: i64,

    pub error_count: i64,

    /// Accumulated [`ErrorEntry`] list
    #[sea_orm(column_type = "JsonBinary")]
    pub errors: JsonValue,

    /// Offset of the next chunk to process
    pub cursor: i64,

    pub retry_count: i32,

    pub last_error: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,

    /// Heartbeat; bumped by every state change
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Decode the persisted error list, skipping entries that no longer parse.
    pub fn error_entries(&self) -> Vec<ErrorEntry> {
        self.errors
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::chunk_task::Entity")]
    ChunkTask,
}

impl Related<super::chunk_task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChunkTask.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_closed() {
        for status in JobStatus::terminal() {
            assert!(status.is_terminal());
        }
        for status in JobStatus::active() {
            assert!(!status.is_terminal());
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let value = serde_json::to_value(JobStatus::CompletedWithErrors).unwrap();
        assert_eq!(value, serde_json::json!("completed_with_errors"));
        assert_eq!(JobStatus::CompletedWithErrors.as_str(), "completed_with_errors");
    }

    #[test]
    fn error_entries_skip_garbage() {
        let entry = ErrorEntry::new("SKU-1", ErrorKind::Validation, "missing name");
        let now = Utc::now().fixed_offset();
        let model = Model {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            kind: JobKind::Import,
            status: JobStatus::Processing,
            source_descriptor: None,
            target_ids: None,
            options: serde_json::json!({}),
            total_items: 1,
            processed_items: 1,
            matched_count: 0,
            new_count: 0,
            suggested_count: 0,
            error_count: 1,
            errors: serde_json::json!([serde_json::to_value(&entry).unwrap(), {"x": 1}]),
            cursor: 1,
            retry_count: 0,
            last_error: None,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            updated_at: now,
        };

        assert_eq!(model.error_entries(), vec![entry]);
    }
}
