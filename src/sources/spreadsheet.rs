//! Spreadsheet source
//!
//! Reads uploaded CSV catalogs. European exports are commonly `;`-separated, so
//! the delimiter is sniffed from the header line unless the descriptor pins it.
//! Parsed sheets are kept in a small LRU cache keyed by path, size and mtime so
//! paging through a large file parses it once.

use std::num::NonZero;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::debug;

use super::trait_::{
    MalformedRow, RawRecord, SourceAdapter, SourceDescriptor, SourceError, SourcePage,
    SourceSettings,
};

/// One parsed row: either a record or the reason it could not be read.
pub type SheetRow = Result<RawRecord, String>;

/// A fully parsed CSV file
#[derive(Debug, Default)]
pub struct Sheet {
    pub rows: Vec<SheetRow>,
}

impl Sheet {
    /// Slice `[offset, offset + limit)` into a page.
    pub fn page(&self, offset: u64, limit: u64) -> SourcePage {
        let total = self.rows.len() as u64;
        let start = offset.min(total);
        let end = offset.saturating_add(limit).min(total);

        let mut page = SourcePage {
            has_more: end < total,
            ..SourcePage::default()
        };

        for (index, row) in self.rows[start as usize..end as usize].iter().enumerate() {
            match row {
                Ok(record) => page.rows.push(record.clone()),
                Err(message) => page.malformed.push(MalformedRow {
                    position: start + index as u64,
                    message: message.clone(),
                }),
            }
        }

        page
    }
}

/// Cache key identifying one version of one file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SheetKey {
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Shared LRU of parsed sheets
#[derive(Clone)]
pub struct SheetCache {
    inner: Arc<Mutex<LruCache<SheetKey, Arc<Sheet>>>>,
}

impl SheetCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZero::new(capacity).unwrap_or(NonZero::<usize>::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub async fn get(&self, key: &SheetKey) -> Option<Arc<Sheet>> {
        self.inner.lock().await.get(key).cloned()
    }

    pub async fn put(&self, key: SheetKey, sheet: Arc<Sheet>) {
        self.inner.lock().await.put(key, sheet);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Pick the most frequent candidate delimiter in the header line, preferring `,` on ties.
pub fn detect_delimiter(data: &[u8]) -> u8 {
    let header_end = data
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(data.len());
    let header = &data[..header_end];

    let mut best = b',';
    let mut best_count = header.iter().filter(|&&b| b == b',').count();
    for candidate in [b';', b'\t'] {
        let count = header.iter().filter(|&&b| b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

/// Parse CSV bytes with a header row into a [`Sheet`].
///
/// Blank cells are omitted from the record; fully blank lines are skipped and
/// do not occupy a position.
pub fn parse_sheet(data: &[u8], delimiter: Option<char>) -> Result<Sheet, SourceError> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);

    let delimiter = match delimiter {
        Some(c) if c.is_ascii() => c as u8,
        Some(c) => {
            return Err(SourceError::Configuration(format!(
                "delimiter '{}' is not a single-byte character",
                c
            )));
        }
        None => detect_delimiter(data),
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| SourceError::MalformedResponse(format!("unreadable header row: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(SourceError::MalformedResponse(
            "spreadsheet has no header row".to_string(),
        ));
    }

    let mut sheet = Sheet::default();
    for result in reader.records() {
        let row = match result {
            Ok(record) => {
                if record.iter().all(str::is_empty) {
                    continue;
                }
                let mut raw = RawRecord::new();
                for (header, value) in headers.iter().zip(record.iter()) {
                    if !header.is_empty() && !value.is_empty() {
                        raw.insert(header.clone(), JsonValue::String(value.to_string()));
                    }
                }
                Ok(raw)
            }
            Err(e) => Err(format!("unreadable row: {}", e)),
        };
        sheet.rows.push(row);
    }

    Ok(sheet)
}

/// Adapter for CSV files on the local filesystem
pub struct SpreadsheetAdapter {
    cache: SheetCache,
}

impl SpreadsheetAdapter {
    pub fn new(cache: SheetCache) -> Self {
        Self { cache }
    }

    async fn load(&self, descriptor: &SourceDescriptor) -> Result<Arc<Sheet>, SourceError> {
        let SourceSettings::Spreadsheet(settings) = &descriptor.settings else {
            return Err(SourceError::Configuration(
                "spreadsheet adapter received non-spreadsheet settings".to_string(),
            ));
        };

        let metadata = tokio::fs::metadata(&settings.path).await.map_err(|e| {
            SourceError::Configuration(format!(
                "cannot stat {}: {}",
                settings.path.display(),
                e
            ))
        })?;

        let key = SheetKey {
            path: settings.path.display().to_string(),
            size: metadata.len(),
            modified: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default(),
        };

        if let Some(sheet) = self.cache.get(&key).await {
            return Ok(sheet);
        }

        let data = tokio::fs::read(&settings.path).await.map_err(|e| {
            SourceError::Connection(format!("cannot read {}: {}", settings.path.display(), e))
        })?;

        let sheet = Arc::new(parse_sheet(&data, settings.delimiter)?);
        debug!(
            path = %key.path,
            rows = sheet.rows.len(),
            "Parsed spreadsheet"
        );
        self.cache.put(key, sheet.clone()).await;
        Ok(sheet)
    }
}

#[async_trait]
impl SourceAdapter for SpreadsheetAdapter {
    fn platform(&self) -> &'static str {
        "spreadsheet"
    }

    async fn count(&self, descriptor: &SourceDescriptor) -> Result<u64, SourceError> {
        Ok(self.load(descriptor).await?.rows.len() as u64)
    }

    async fn fetch_page(
        &self,
        descriptor: &SourceDescriptor,
        offset: u64,
        limit: u64,
    ) -> Result<SourcePage, SourceError> {
        Ok(self.load(descriptor).await?.page(offset, limit))
    }
}
