//! Source adapters
//!
//! - The [`SourceAdapter`] trait every catalog platform implements
//! - The [`SourceRegistry`] used to resolve a job's platform
//! - Built-in REST, spreadsheet and file-drop adapters

pub mod file_drop;
pub mod registry;
pub mod rest;
pub mod spreadsheet;
pub mod trait_;

pub use file_drop::{FileDropAdapter, FileStore, LocalFileStore, RemoteFile};
pub use registry::{RegistryError, SourceRegistry};
pub use rest::RestCatalogAdapter;
pub use spreadsheet::{SheetCache, SpreadsheetAdapter};
pub use trait_::{
    FileDropSettings, MalformedRow, RawRecord, RestSettings, SourceAdapter, SourceDescriptor,
    SourceError, SourcePage, SourceSettings, SpreadsheetSettings,
};
