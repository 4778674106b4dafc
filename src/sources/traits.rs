//! Source fetching abstraction
//!
//! The merge engine never performs I/O for sources itself; it receives raw
//! text from a [`SourceFetcher`]. A failed fetch is reported as
//! [`SourceError::Unavailable`](crate::errors::SourceError::Unavailable) and
//! the run carries on with the remaining sources.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::errors::SourceResult;
use crate::models::SourcePlaylist;

/// Where a source's raw text lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Url(String),
    Path(PathBuf),
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceLocation::Url(url) => write!(f, "{url}"),
            SourceLocation::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Obtain the raw text of one source, tagged with `origin`
    async fn fetch(&self, origin: &str, location: &SourceLocation) -> SourceResult<SourcePlaylist>;
}
