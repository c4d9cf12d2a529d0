//! # Common API Types
//!
//! Page-size validation and the keyset page envelope shared by list endpoints.

use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::error::{ApiError, validation_error};

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Resolve a requested page size, rejecting values outside `1..=100`.
pub fn page_limit(requested: Option<u32>) -> Result<u32, ApiError> {
    match requested {
        None => Ok(DEFAULT_PAGE_LIMIT),
        Some(limit) if (1..=MAX_PAGE_LIMIT).contains(&limit) => Ok(limit),
        Some(limit) => Err(validation_error(
            "Invalid limit",
            json!({ "limit": format!("Must be between 1 and {}, got {}", MAX_PAGE_LIMIT, limit) }),
        )),
    }
}

/// One page of a keyset-paginated listing
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T> {
    /// Items on this page, newest first
    pub data: Vec<T>,
    /// Opaque cursor for the next page; null on the last page
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    /// Build a page from rows fetched with `limit + 1`.
    ///
    /// The extra row only signals that another page exists; the cursor points
    /// at the last row actually returned.
    pub fn from_overfetched<R>(
        mut rows: Vec<R>,
        limit: u32,
        cursor_of: impl Fn(&R) -> String,
        view: impl Fn(R) -> T,
    ) -> Self {
        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);

        let next_cursor = if has_more { rows.last().map(&cursor_of) } else { None };
        Self {
            data: rows.into_iter().map(view).collect(),
            next_cursor,
            has_more,
        }
    }
}
