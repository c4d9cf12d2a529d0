//! Source adapter trait definition
//!
//! Every external catalog (REST API, uploaded spreadsheet, file drop) is read
//! through the same two calls: `count` for the size estimate taken when the
//! job is created, and `fetch_page` for one bounded window of raw rows.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use utoipa::ToSchema;

/// One raw source row, keyed by source column or field name
pub type RawRecord = serde_json::Map<String, JsonValue>;

/// A row the adapter could not turn into a [`RawRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRow {
    /// Absolute position of the row within the source
    pub position: u64,
    pub message: String,
}

/// Result of one `fetch_page` call.
///
/// `rows.len() + malformed.len()` is the number of source positions consumed.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub rows: Vec<RawRecord>,
    pub malformed: Vec<MalformedRow>,
    pub has_more: bool,
}

impl SourcePage {
    pub fn consumed(&self) -> u64 {
        (self.rows.len() + self.malformed.len()) as u64
    }
}

/// Failure taxonomy shared by all adapters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// Network failure, 429 or 5xx from the upstream
    #[error("connection error: {0}")]
    Connection(String),
    /// Credentials rejected; retrying will not help
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// Upstream answered with something we cannot parse
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("page fetch timed out after {0}s")]
    Timeout(u64),
    /// The descriptor itself is unusable (missing file, unknown platform settings)
    #[error("invalid source configuration: {0}")]
    Configuration(String),
}

impl SourceError {
    /// Transient failures are retried up to the job's retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Connection(_) | SourceError::MalformedResponse(_) | SourceError::Timeout(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Connection(_) => "connection",
            SourceError::Auth(_) => "auth",
            SourceError::MalformedResponse(_) => "malformed_response",
            SourceError::Timeout(_) => "timeout",
            SourceError::Configuration(_) => "configuration",
        }
    }
}

/// Where an import job reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SourceDescriptor {
    /// Stable identifier of the source; scopes supplier records
    #[schema(example = "acme-wholesale")]
    pub source_id: String,
    #[serde(flatten)]
    pub settings: SourceSettings,
}

/// Platform-specific connection settings, discriminated by `platform`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum SourceSettings {
    Rest(RestSettings),
    Spreadsheet(SpreadsheetSettings),
    FileDrop(FileDropSettings),
}

impl SourceSettings {
    /// Registry key of the adapter serving these settings
    pub fn platform(&self) -> &'static str {
        match self {
            SourceSettings::Rest(_) => "rest",
            SourceSettings::Spreadsheet(_) => "spreadsheet",
            SourceSettings::FileDrop(_) => "file_drop",
        }
    }
}

/// Paginated REST catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RestSettings {
    #[schema(example = "https://supplier.example.com/api")]
    pub base_url: String,
    /// Path of the paginated listing, queried with `offset` and `limit`
    #[serde(default = "default_items_path")]
    pub items_path: String,
    /// Field holding the item array when the body is an object
    #[serde(default = "default_items_field")]
    pub items_field: String,
    /// Optional endpoint returning `{"total": n}`
    #[serde(default)]
    pub count_path: Option<String>,
    /// Name of the environment variable holding the bearer token
    #[serde(default)]
    pub credential_env: Option<String>,
    /// Extra static query parameters
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

/// Uploaded CSV file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SpreadsheetSettings {
    #[schema(value_type = String)]
    pub path: PathBuf,
    /// Field delimiter; detected from the header line when absent
    #[serde(default)]
    pub delimiter: Option<char>,
}

/// Drop folder served through a [`crate::sources::file_drop::FileStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FileDropSettings {
    /// Directory inside the store to watch
    pub directory: String,
    /// Only files with this extension are considered
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub delimiter: Option<char>,
}

fn default_items_path() -> String {
    "/products".to_string()
}

fn default_items_field() -> String {
    "items".to_string()
}

fn default_extension() -> String {
    "csv".to_string()
}

/// Contract implemented by every source platform.
///
/// `fetch_page` must return equivalent data for the same `(offset, limit)`;
/// chunks are retried and re-driven by offset alone.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry key, e.g. `"rest"`
    fn platform(&self) -> &'static str;

    /// Estimated number of rows the source will yield
    async fn count(&self, descriptor: &SourceDescriptor) -> Result<u64, SourceError>;

    /// Fetch rows `[offset, offset + limit)`
    async fn fetch_page(
        &self,
        descriptor: &SourceDescriptor,
        offset: u64,
        limit: u64,
    ) -> Result<SourcePage, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_deserializes_by_platform_tag() {
        let descriptor: SourceDescriptor = serde_json::from_value(json!({
            "source_id": "acme",
            "platform": "rest",
            "base_url": "https://acme.test/api"
        }))
        .unwrap();

        assert_eq!(descriptor.settings.platform(), "rest");
        let SourceSettings::Rest(rest) = descriptor.settings else {
            panic!("expected rest settings");
        };
        assert_eq!(rest.items_path, "/products");
        assert_eq!(rest.items_field, "items");
    }

    #[test]
    fn unknown_platform_is_rejected() {
        let result = serde_json::from_value::<SourceDescriptor>(json!({
            "source_id": "acme",
            "platform": "carrier_pigeon"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn transient_classification() {
        assert!(SourceError::Connection("reset".into()).is_transient());
        assert!(SourceError::MalformedResponse("html".into()).is_transient());
        assert!(SourceError::Timeout(60).is_transient());
        assert!(!SourceError::Auth("401".into()).is_transient());
        assert!(!SourceError::Configuration("no file".into()).is_transient());
    }
}
