//! Centralized error handling for the playlist merger
//!
//! # Error Categories
//!
//! - **Source Errors**: unavailable sources, malformed entries, probe outcomes.
//!   These never abort a run.
//! - **Configuration Errors**: unreadable config files or invalid rule patterns
//! - **NoChannelsProduced**: the only failure that aborts a run
//!
//! # Usage
//!
//! ```rust
//! use m3u_merge::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Source Results
pub type SourceResult<T> = Result<T, SourceError>;
