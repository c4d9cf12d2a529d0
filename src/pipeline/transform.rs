//! Row transformer and validator
//!
//! Maps a raw source row onto the typed product shape. Column names are
//! matched case-insensitively against a per-field alias list, which a job can
//! override per field. Unmapped columns land in a bounded `extra` map.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value as JsonValue;
use thiserror::Error;

use super::ean::normalize_ean;
use crate::models::job::ErrorKind;
use crate::sources::RawRecord;

pub const MAX_EXTRA_ENTRIES: usize = 32;
pub const MAX_EXTRA_KEY_CHARS: usize = 64;
pub const MAX_EXTRA_VALUE_CHARS: usize = 512;

/// A validated product row ready for matching and upsert
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    pub external_reference: String,
    /// Validated GTIN-13
    pub ean: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub price: f64,
    pub stock: i64,
    /// Upper-case ISO 4217 code
    pub currency: String,
    pub extra: BTreeMap<String, String>,
}

/// Row-level rejection; the chunk records it and moves on
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("{0}")]
    Parsing(String),
    #[error("{0}")]
    Validation(String),
}

impl RowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RowError::Parsing(_) => ErrorKind::Parsing,
            RowError::Validation(_) => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ExternalReference,
    Ean,
    Name,
    Brand,
    Price,
    Stock,
    Currency,
}

impl Field {
    const ALL: [Field; 7] = [
        Field::ExternalReference,
        Field::Ean,
        Field::Name,
        Field::Brand,
        Field::Price,
        Field::Stock,
        Field::Currency,
    ];

    fn key(self) -> &'static str {
        match self {
            Field::ExternalReference => "external_reference",
            Field::Ean => "ean",
            Field::Name => "name",
            Field::Brand => "brand",
            Field::Price => "price",
            Field::Stock => "stock",
            Field::Currency => "currency",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::ExternalReference => &[
                "external_reference",
                "reference",
                "ref",
                "sku",
                "supplier_sku",
                "article_number",
                "artikelnummer",
                "art_nr",
                "item_id",
                "product_id",
                "id",
            ],
            Field::Ean => &["ean", "ean13", "ean_13", "gtin", "gtin13", "barcode", "upc"],
            Field::Name => &[
                "name",
                "title",
                "product_name",
                "productname",
                "item_name",
                "bezeichnung",
                "artikelname",
            ],
            Field::Brand => &["brand", "manufacturer", "hersteller", "marke", "vendor"],
            Field::Price => &[
                "price",
                "preis",
                "unit_price",
                "net_price",
                "vk_preis",
                "prix",
                "cost",
            ],
            Field::Stock => &[
                "stock",
                "quantity",
                "qty",
                "inventory",
                "stock_quantity",
                "bestand",
                "menge",
            ],
            Field::Currency => &["currency", "currency_code", "waehrung", "währung"],
        }
    }
}

/// Column names compare after lower-casing and folding spaces, dots and hyphens to `_`.
fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' || c == '.' { '_' } else { c })
        .collect()
}

/// Scalar JSON value as trimmed text; `None` for null, empty strings and containers.
fn value_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_currency_symbol(c: char) -> bool {
    matches!(c, '€' | '$' | '£' | '¥' | '₹' | '₽' | '₺' | '₩' | '¢' | '₣')
}

/// Currency implied by a symbol in a price string
pub fn currency_from_symbol(text: &str) -> Option<&'static str> {
    text.chars().find_map(|c| match c {
        '€' => Some("EUR"),
        '$' => Some("USD"),
        '£' => Some("GBP"),
        '¥' => Some("JPY"),
        '₹' => Some("INR"),
        _ => None,
    })
}

/// Parse a decimal number written with either `.` or `,` as decimal separator.
///
/// - both present: the right-most one is the decimal separator
/// - one kind repeated: thousands separators
/// - a single separator followed by exactly three digits with a non-zero
///   integer part (`1.234`, `12,500`): thousands separator
/// - otherwise a decimal separator
pub fn parse_decimal(text: &str) -> Option<f64> {
    let stripped: String = text
        .trim_matches(|c: char| c.is_alphabetic() || c.is_whitespace() || is_currency_symbol(c))
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'' && !is_currency_symbol(*c))
        .collect();

    if stripped.is_empty()
        || !stripped
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == ',' || c == '-')
        || stripped.rfind('-').is_some_and(|pos| pos != 0)
    {
        return None;
    }

    let last_dot = stripped.rfind('.');
    let last_comma = stripped.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            let (decimal, thousands) = if dot > comma { ('.', ',') } else { (',', '.') };
            let without: String = stripped.chars().filter(|c| *c != thousands).collect();
            if without.matches(decimal).count() > 1 {
                return None;
            }
            without.replace(decimal, ".")
        }
        (Some(_), None) => resolve_single_separator(&stripped, '.')?,
        (None, Some(_)) => resolve_single_separator(&stripped, ',')?,
        (None, None) => stripped,
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn resolve_single_separator(text: &str, separator: char) -> Option<String> {
    if text.matches(separator).count() > 1 {
        return Some(text.chars().filter(|c| *c != separator).collect());
    }

    let (integer, fraction) = text.split_once(separator)?;
    let integer_digits = integer.trim_start_matches('-');
    let is_thousands = fraction.len() == 3
        && !integer_digits.is_empty()
        && integer_digits.trim_start_matches('0') != "";

    if is_thousands {
        Some(format!("{}{}", integer, fraction))
    } else {
        Some(format!("{}.{}", integer, fraction))
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Maps raw rows onto [`ProductRow`] for one job
#[derive(Debug, Clone)]
pub struct RowTransformer {
    overrides: BTreeMap<String, String>,
    default_currency: String,
}

impl RowTransformer {
    /// `field_mapping` maps a product field (`name`, `price`, ...) to a source column.
    pub fn new(field_mapping: &BTreeMap<String, String>, default_currency: &str) -> Self {
        Self {
            overrides: field_mapping
                .iter()
                .map(|(field, column)| (normalize_key(field), normalize_key(column)))
                .collect(),
            default_currency: default_currency.trim().to_uppercase(),
        }
    }

    fn column_for<'a>(
        &self,
        field: Field,
        index: &'a BTreeMap<String, (&'a String, &'a JsonValue)>,
    ) -> Option<(&'a String, &'a JsonValue)> {
        if let Some(column) = self.overrides.get(field.key()) {
            return index.get(column).copied();
        }
        field
            .aliases()
            .iter()
            .find_map(|alias| index.get(*alias).copied())
    }

    /// Best-effort reference for error reporting on rows that fail validation
    pub fn reference_hint(&self, raw: &RawRecord) -> Option<String> {
        let index = Self::index(raw);
        self.column_for(Field::ExternalReference, &index)
            .and_then(|(_, value)| value_text(value))
            .or_else(|| {
                self.column_for(Field::Ean, &index)
                    .and_then(|(_, value)| value_text(value))
            })
    }

    fn index(raw: &RawRecord) -> BTreeMap<String, (&String, &JsonValue)> {
        raw.iter()
            .map(|(key, value)| (normalize_key(key), (key, value)))
            .collect()
    }

    pub fn transform(&self, raw: &RawRecord) -> Result<ProductRow, RowError> {
        let index = Self::index(raw);
        let mut consumed: HashSet<&String> = HashSet::new();
        let mut values: BTreeMap<&'static str, &JsonValue> = BTreeMap::new();

        for field in Field::ALL {
            if let Some((key, value)) = self.column_for(field, &index) {
                consumed.insert(key);
                values.insert(field.key(), value);
            }
        }

        let text = |field: Field| values.get(field.key()).and_then(|v| value_text(v));

        let name = text(Field::Name)
            .ok_or_else(|| RowError::Validation("missing name".to_string()))?;

        let ean = text(Field::Ean).and_then(|raw| normalize_ean(&raw));

        let price_value = values
            .get(Field::Price.key())
            .copied()
            .filter(|v| !v.is_null() && value_text(v).is_some())
            .ok_or_else(|| RowError::Validation("missing price".to_string()))?;
        let price_text = value_text(price_value).unwrap_or_default();
        let price = match price_value {
            JsonValue::Number(n) => n.as_f64(),
            _ => parse_decimal(&price_text),
        }
        .ok_or_else(|| RowError::Parsing(format!("unparsable price '{}'", price_text)))?;
        if price < 0.0 {
            return Err(RowError::Validation(format!("negative price {}", price)));
        }

        let stock = match values.get(Field::Stock.key()) {
            Some(JsonValue::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                .unwrap_or(0),
            Some(value) => match value_text(value) {
                Some(raw) => parse_decimal(&raw)
                    .map(|f| f.trunc() as i64)
                    .ok_or_else(|| RowError::Parsing(format!("unparsable stock '{}'", raw)))?,
                None => 0,
            },
            None => 0,
        }
        .max(0);

        let currency = match text(Field::Currency) {
            Some(code) => {
                let code = code.to_uppercase();
                if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(RowError::Validation(format!(
                        "invalid currency code '{}'",
                        code
                    )));
                }
                code
            }
            None => currency_from_symbol(&price_text)
                .map(str::to_string)
                .unwrap_or_else(|| self.default_currency.clone()),
        };

        let external_reference = text(Field::ExternalReference)
            .or_else(|| ean.clone())
            .ok_or_else(|| {
                RowError::Validation("missing external reference and no valid EAN".to_string())
            })?;

        let brand = text(Field::Brand);

        let extra = raw
            .iter()
            .filter(|(key, _)| !consumed.contains(key))
            .filter(|(key, _)| {
                !key.trim().is_empty() && key.chars().count() <= MAX_EXTRA_KEY_CHARS
            })
            .filter_map(|(key, value)| {
                let rendered = match value {
                    JsonValue::Array(_) | JsonValue::Object(_) => Some(value.to_string()),
                    other => value_text(other),
                }?;
                Some((
                    key.trim().to_string(),
                    truncate_chars(&rendered, MAX_EXTRA_VALUE_CHARS),
                ))
            })
            .take(MAX_EXTRA_ENTRIES)
            .collect();

        Ok(ProductRow {
            external_reference,
            ean,
            name,
            brand,
            price,
            stock,
            currency,
            extra,
        })
    }
}

impl Default for RowTransformer {
    fn default() -> Self {
        Self::new(&BTreeMap::new(), "EUR")
    }
}
