//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for jobs,
//! chunk tasks and match suggestions, with owner-scoped access methods.

pub mod chunk_task;
pub mod job;
pub mod suggestion;

pub use job::{JobListFilter, JobRepository};
pub use suggestion::SuggestionRepository;
