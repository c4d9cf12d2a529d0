//! Source registry
//!
//! Maps a platform key (`rest`, `spreadsheet`, `file_drop`) to its adapter.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::file_drop::{FileDropAdapter, FileStore, LocalFileStore};
use super::rest::RestCatalogAdapter;
use super::spreadsheet::{SheetCache, SpreadsheetAdapter};
use super::trait_::{SourceAdapter, SourceError};
use crate::config::ImportConfig;

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Source platform '{name}' not found")]
    PlatformNotFound { name: String },
}

/// Registry of source adapters
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in adapters.
    ///
    /// File drops are read from `drop_root` through the local store; both file
    /// adapters share one parsed-sheet cache.
    pub fn with_defaults(
        config: &ImportConfig,
        drop_root: impl Into<PathBuf>,
    ) -> Result<Self, SourceError> {
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(drop_root));
        Self::with_file_store(config, store)
    }

    /// Registry with the built-in adapters and a custom drop-folder store.
    pub fn with_file_store(
        config: &ImportConfig,
        store: Arc<dyn FileStore>,
    ) -> Result<Self, SourceError> {
        let cache = SheetCache::new(config.file_cache_entries);
        let mut registry = Self::new();

        registry.register(Arc::new(RestCatalogAdapter::new(Duration::from_secs(
            config.fetch_timeout_seconds,
        ))?));
        registry.register(Arc::new(SpreadsheetAdapter::new(cache.clone())));
        registry.register(Arc::new(FileDropAdapter::new(store, cache)));

        info!(platforms = ?registry.platforms(), "Source registry initialised");
        Ok(registry)
    }

    /// Register an adapter under its own platform key, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.platform().to_string(), adapter);
    }

    /// Look up the adapter for `platform`
    pub fn get(&self, platform: &str) -> Result<Arc<dyn SourceAdapter>, RegistryError> {
        self.adapters
            .get(platform)
            .cloned()
            .ok_or_else(|| RegistryError::PlatformNotFound {
                name: platform.to_string(),
            })
    }

    /// Registered platform keys, sorted
    pub fn platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}
