//! Import pipeline stages: transform, match, upsert.

pub mod ean;
pub mod matcher;
pub mod transform;
pub mod upsert;

pub use ean::{is_valid_ean13, normalize_ean};
pub use matcher::{
    CandidateWindow, EntityMatcher, MatchDecision, MatchPolicy, MatchResult, brand_token,
    fuzzy_confidence, similarity,
};
pub use transform::{ProductRow, RowError, RowTransformer};
pub use upsert::{UpsertOutcome, UpsertResult, UpsertScope, UpsertWriter};
