//! # Catalog Sync Library
//!
//! Resumable chunked catalog imports with entity matching, and cascading
//! bulk deletions, behind an HTTP API and a persisted chunk-task queue.

pub mod chunk_executor;
pub mod config;
pub mod cursor;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod repositories;
pub mod server;
pub mod sources;
pub mod telemetry;
pub mod watchdog;
pub use migration;
