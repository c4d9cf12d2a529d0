//! Entity matcher
//!
//! Strategies run in order and stop at the first candidate:
//! 1. exact EAN within the owner scope (confidence 100)
//! 2. same brand plus the first model token in the candidate name (85)
//! 3. best fuzzy name similarity above the floor (`round(sim * 95)`, max 95)
//!
//! Strategies 2 and 3 scan a [`CandidateWindow`] loaded once per chunk.

use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use uuid::Uuid;

use super::transform::ProductRow;
use crate::config::ImportConfig;
use crate::models::canonical_product::{self, Entity as CanonicalProduct};
use crate::models::match_link::LinkType;

pub const EXACT_CONFIDENCE: u8 = 100;
pub const BRAND_MODEL_CONFIDENCE: u8 = 85;
pub const FUZZY_CONFIDENCE_CAP: u8 = 95;

/// Normalized Levenshtein similarity of two names, case-insensitive, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(&a, &b);
    (1.0 - distance as f64 / max_len as f64).clamp(0.0, 1.0)
}

/// Confidence for a fuzzy similarity
pub fn fuzzy_confidence(similarity: f64) -> u8 {
    let clamped = similarity.clamp(0.0, 1.0);
    ((clamped * 95.0).round() as u8).min(FUZZY_CONFIDENCE_CAP)
}

/// First token of at least two alphanumeric characters once the brand is
/// removed from the name.
pub fn brand_token(name: &str, brand: &str) -> Option<String> {
    let brand = brand.trim().to_lowercase();
    let lowered = name.to_lowercase();
    let remainder = if brand.is_empty() {
        lowered
    } else {
        lowered.replace(&brand, " ")
    };

    remainder
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .find(|token| token.chars().filter(|c| c.is_alphanumeric()).count() >= 2)
        .map(str::to_string)
}

/// A candidate canonical product, pre-lowered for scanning
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: Uuid,
    pub name: String,
    name_lower: String,
    brand_lower: Option<String>,
    name_len: usize,
}

impl From<&canonical_product::Model> for Candidate {
    fn from(model: &canonical_product::Model) -> Self {
        let name_lower = model.name.to_lowercase();
        Self {
            id: model.id,
            name: model.name.clone(),
            name_len: name_lower.chars().count(),
            name_lower,
            brand_lower: model.brand.as_ref().map(|b| b.trim().to_lowercase()),
        }
    }
}

/// The owner's most recently updated canonical products, newest first
#[derive(Debug, Clone, Default)]
pub struct CandidateWindow {
    candidates: Vec<Candidate>,
}

impl CandidateWindow {
    pub async fn load<C: ConnectionTrait>(
        conn: &C,
        owner_id: Uuid,
        limit: u64,
    ) -> Result<Self, DbErr> {
        let products = CanonicalProduct::find()
            .filter(canonical_product::Column::OwnerId.eq(owner_id))
            .order_by_desc(canonical_product::Column::UpdatedAt)
            .order_by_asc(canonical_product::Column::Id)
            .limit(limit)
            .all(conn)
            .await?;
        Ok(Self::from_products(&products))
    }

    pub fn from_products(products: &[canonical_product::Model]) -> Self {
        Self {
            candidates: products.iter().map(Candidate::from).collect(),
        }
    }

    /// Make a product created mid-chunk visible to later rows of the same chunk.
    pub fn push_front(&mut self, product: &canonical_product::Model) {
        if self.candidates.iter().any(|c| c.id == product.id) {
            return;
        }
        self.candidates.insert(0, Candidate::from(product));
    }

    /// Drop a product deleted mid-chunk.
    pub fn remove(&mut self, product_id: Uuid) {
        self.candidates.retain(|c| c.id != product_id);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub canonical_product_id: Uuid,
    pub link_type: LinkType,
    /// In `[0, 100]`
    pub confidence: u8,
}

/// What the upsert writer should do with a row
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchDecision {
    AutoLink(MatchResult),
    Suggest(MatchResult),
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    pub auto_link_threshold: u8,
    pub suggestion_threshold: u8,
    pub fuzzy_min_similarity: f64,
    /// When false every candidate becomes a suggestion
    pub auto_link: bool,
}

impl MatchPolicy {
    pub fn from_config(config: &ImportConfig, auto_link: bool) -> Self {
        Self {
            auto_link_threshold: config.auto_link_threshold,
            suggestion_threshold: config.suggestion_threshold,
            fuzzy_min_similarity: config.fuzzy_min_similarity,
            auto_link,
        }
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::from_config(&ImportConfig::default(), true)
    }
}

#[derive(Debug, Clone)]
pub struct EntityMatcher {
    policy: MatchPolicy,
}

impl EntityMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Run all strategies for one row
    pub async fn find_match<C: ConnectionTrait>(
        &self,
        conn: &C,
        owner_id: Uuid,
        row: &ProductRow,
        window: &CandidateWindow,
    ) -> Result<Option<MatchResult>, DbErr> {
        if let Some(ean) = &row.ean
            && let Some(product) = CanonicalProduct::find()
                .filter(canonical_product::Column::OwnerId.eq(owner_id))
                .filter(canonical_product::Column::Ean.eq(ean.as_str()))
                .one(conn)
                .await?
        {
            return Ok(Some(MatchResult {
                canonical_product_id: product.id,
                link_type: LinkType::ExactId,
                confidence: EXACT_CONFIDENCE,
            }));
        }

        Ok(self.match_in_window(row, window))
    }

    /// Brand and fuzzy strategies over the preloaded window
    pub fn match_in_window(&self, row: &ProductRow, window: &CandidateWindow) -> Option<MatchResult> {
        self.match_brand_model(row, window)
            .or_else(|| self.match_fuzzy(row, window))
    }

    fn match_brand_model(&self, row: &ProductRow, window: &CandidateWindow) -> Option<MatchResult> {
        let brand = row.brand.as_deref()?.trim().to_lowercase();
        if brand.is_empty() {
            return None;
        }
        let token = brand_token(&row.name, &brand)?;

        window
            .candidates
            .iter()
            .find(|c| c.brand_lower.as_deref() == Some(brand.as_str()) && c.name_lower.contains(&token))
            .map(|c| MatchResult {
                canonical_product_id: c.id,
                link_type: LinkType::BrandModel,
                confidence: BRAND_MODEL_CONFIDENCE,
            })
    }

    fn match_fuzzy(&self, row: &ProductRow, window: &CandidateWindow) -> Option<MatchResult> {
        let name = row.name.to_lowercase();
        let name_len = name.chars().count();
        let floor = self.policy.fuzzy_min_similarity;

        let mut best: Option<(f64, &Candidate)> = None;
        for candidate in &window.candidates {
            // Upper bound on similarity from the length difference alone
            let longest = name_len.max(candidate.name_len);
            if longest > 0 {
                let bound = 1.0 - name_len.abs_diff(candidate.name_len) as f64 / longest as f64;
                if bound <= floor {
                    continue;
                }
            }

            let score = similarity(&name, &candidate.name_lower);
            if score > floor && best.is_none_or(|(top, _)| score > top) {
                best = Some((score, candidate));
            }
        }

        best.map(|(score, candidate)| MatchResult {
            canonical_product_id: candidate.id,
            link_type: LinkType::FuzzyName,
            confidence: fuzzy_confidence(score),
        })
    }

    /// Apply the link/suggest thresholds
    pub fn decide(&self, result: Option<MatchResult>) -> MatchDecision {
        match result {
            Some(m) if self.policy.auto_link && m.confidence >= self.policy.auto_link_threshold => {
                MatchDecision::AutoLink(m)
            }
            Some(m) if m.confidence >= self.policy.suggestion_threshold => MatchDecision::Suggest(m),
            _ => MatchDecision::NoMatch,
        }
    }
}
