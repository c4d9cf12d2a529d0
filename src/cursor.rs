//! # Cursor Utilities
//!
//! Opaque keyset cursors for job listings. A cursor is the `(created_at, id)`
//! of the last row on the previous page, JSON-encoded then URL-safe base64.

use crate::error::ApiError;
use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_CURSOR_LEN: usize = 512;

/// Position of the last job returned on a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

fn invalid(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
}

/// Encode a cursor as an opaque string
pub fn encode_cursor(created_at: &DateTime<Utc>, id: &Uuid) -> String {
    let cursor = JobCursor {
        created_at: *created_at,
        id: *id,
    };
    let json = serde_json::to_vec(&cursor).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode and validate an opaque cursor
pub fn decode_cursor(cursor: &str) -> Result<JobCursor, ApiError> {
    if cursor.is_empty() {
        return Err(invalid("cursor cannot be empty"));
    }

    if cursor.len() > MAX_CURSOR_LEN {
        return Err(invalid("cursor is too long"));
    }

    if !cursor
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("cursor contains invalid characters"));
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| invalid("cursor is not valid base64"))?;

    let parsed: JobCursor = serde_json::from_slice(&decoded)
        .map_err(|_| invalid("cursor contains invalid JSON structure"))?;

    if parsed.id.is_nil() {
        return Err(invalid("cursor contains invalid ID"));
    }

    Ok(parsed)
}
