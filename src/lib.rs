//! Merge several extended-M3U channel lists into one deduplicated, ordered
//! playlist.
//!
//! The pipeline lives in [`merge::MergeEngine`]; configuration, source
//! fetching and liveness probing are separate modules so callers can supply
//! their own collaborators.

pub mod config;
pub mod data_mapping;
pub mod errors;
pub mod ingestor;
pub mod merge;
pub mod models;
pub mod services;
pub mod sources;

pub use errors::{AppError, AppResult, SourceError, SourceResult};
