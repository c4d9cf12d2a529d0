//! File drop source
//!
//! Suppliers push catalog exports into a drop folder. The adapter lists the
//! folder through a [`FileStore`], takes the newest file with the configured
//! extension and serves pages from its parsed contents.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::spreadsheet::{Sheet, SheetCache, SheetKey, parse_sheet};
use super::trait_::{
    FileDropSettings, SourceAdapter, SourceDescriptor, SourceError, SourcePage, SourceSettings,
};

/// A file visible in a drop folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the store root
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Listing and download primitives of a drop folder (local disk, FTP, SFTP).
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn list(&self, directory: &str) -> Result<Vec<RemoteFile>, SourceError>;

    async fn download(&self, file: &RemoteFile) -> Result<Vec<u8>, SourceError>;
}

/// Drop folder on a locally mounted filesystem
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, SourceError> {
        let relative = relative.trim_start_matches('/');
        if relative.split('/').any(|part| part == "..") {
            return Err(SourceError::Configuration(format!(
                "path '{}' escapes the drop root",
                relative
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn list(&self, directory: &str) -> Result<Vec<RemoteFile>, SourceError> {
        let dir = self.resolve(directory)?;
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            SourceError::Configuration(format!("cannot list {}: {}", dir.display(), e))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::Connection(format!("listing interrupted: {}", e)))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| SourceError::Connection(format!("cannot stat entry: {}", e)))?;
            if !metadata.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(RemoteFile {
                path: format!("{}/{}", directory.trim_end_matches('/'), name),
                size: metadata.len(),
                modified: metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_default(),
            });
        }

        Ok(files)
    }

    async fn download(&self, file: &RemoteFile) -> Result<Vec<u8>, SourceError> {
        let path = self.resolve(&file.path)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| SourceError::Connection(format!("cannot read {}: {}", path.display(), e)))
    }
}

/// Newest file with `extension` (case-insensitive); ties broken by path.
pub fn select_latest<'a>(files: &'a [RemoteFile], extension: &str) -> Option<&'a RemoteFile> {
    let suffix = format!(".{}", extension.trim_start_matches('.').to_ascii_lowercase());
    files
        .iter()
        .filter(|file| file.path.to_ascii_lowercase().ends_with(&suffix))
        .max_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)))
}

/// Adapter serving the newest export found in a drop folder
pub struct FileDropAdapter {
    store: Arc<dyn FileStore>,
    cache: SheetCache,
}

impl FileDropAdapter {
    pub fn new(store: Arc<dyn FileStore>, cache: SheetCache) -> Self {
        Self { store, cache }
    }

    fn settings(descriptor: &SourceDescriptor) -> Result<&FileDropSettings, SourceError> {
        match &descriptor.settings {
            SourceSettings::FileDrop(settings) => Ok(settings),
            _ => Err(SourceError::Configuration(
                "file drop adapter received non-file-drop settings".to_string(),
            )),
        }
    }

    async fn load(&self, descriptor: &SourceDescriptor) -> Result<Arc<Sheet>, SourceError> {
        let settings = Self::settings(descriptor)?;
        let files = self.store.list(&settings.directory).await?;
        let latest = select_latest(&files, &settings.extension).ok_or_else(|| {
            SourceError::Configuration(format!(
                "no .{} file in drop folder {}",
                settings.extension, settings.directory
            ))
        })?;

        let key = SheetKey {
            path: latest.path.clone(),
            size: latest.size,
            modified: latest.modified,
        };

        if let Some(sheet) = self.cache.get(&key).await {
            debug!(path = %key.path, "File drop cache hit");
            return Ok(sheet);
        }

        let data = self.store.download(latest).await?;
        let sheet = Arc::new(parse_sheet(&data, settings.delimiter)?);
        info!(
            path = %key.path,
            size = key.size,
            rows = sheet.rows.len(),
            "Downloaded file drop export"
        );
        self.cache.put(key, sheet.clone()).await;
        Ok(sheet)
    }
}

#[async_trait]
impl SourceAdapter for FileDropAdapter {
    fn platform(&self) -> &'static str {
        "file_drop"
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
