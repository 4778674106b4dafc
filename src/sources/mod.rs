//! Playlist sources: fetching and per-source entry selection

use futures::future::join_all;
use tracing::warn;

pub mod m3u;
pub mod traits;

pub use m3u::{FileFetcher, HttpFetcher, PlaylistFetcher};
pub use traits::{SourceFetcher, SourceLocation};

use crate::config::SourceConfig;
use crate::errors::{SourceError, SourceResult};
use crate::models::{ATTR_GROUP_TITLE, RawChannelEntry, SourcePlaylist};

/// Which entries of a source take part in the merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSelection {
    /// Accept only entries whose group-title is one of these
    pub include_groups: Vec<String>,
    /// Accept only entries whose name or group contains one of these
    pub include_keywords: Vec<String>,
    /// Keep at most this many accepted entries
    pub limit: Option<usize>,
    /// Overrides group-title on accepted entries
    pub group: Option<String>,
}

impl SourceSelection {
    pub fn accepts(&self, entry: &RawChannelEntry) -> bool {
        self.accepts_group(entry) && self.accepts_keywords(entry)
    }

    fn accepts_group(&self, entry: &RawChannelEntry) -> bool {
        if self.include_groups.is_empty() {
            return true;
        }
        entry.group().is_some_and(|group| {
            self.include_groups
                .iter()
                .any(|wanted| wanted.trim() == group.trim())
        })
    }

    fn accepts_keywords(&self, entry: &RawChannelEntry) -> bool {
        if self.include_keywords.is_empty() {
            return true;
        }
        let name = entry.name.to_lowercase();
        let group = entry.group().unwrap_or_default().to_lowercase();

        self.include_keywords
            .iter()
            .map(|keyword| keyword.trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .any(|keyword| name.contains(&keyword) || group.contains(&keyword))
    }

    pub fn limit_reached(&self, accepted: usize) -> bool {
        self.limit.is_some_and(|limit| accepted >= limit)
    }

    pub fn apply_group(&self, entry: &mut RawChannelEntry) {
        if let Some(group) = self.group.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
            entry
                .attributes
                .insert(ATTR_GROUP_TITLE.to_string(), group.to_string());
        }
    }
}

/// One source as handed to the merge engine
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub name: String,
    pub selection: SourceSelection,
    pub playlist: SourceResult<SourcePlaylist>,
}

impl SourceInput {
    pub fn available(playlist: SourcePlaylist) -> Self {
        Self {
            name: playlist.origin.clone(),
            selection: SourceSelection::default(),
            playlist: Ok(playlist),
        }
    }

    pub fn with_selection(mut self, selection: SourceSelection) -> Self {
        self.selection = selection;
        self
    }
}

/// Fetch every configured source concurrently, keeping configuration order
pub async fn fetch_sources(fetcher: &dyn SourceFetcher, sources: &[SourceConfig]) -> Vec<SourceInput> {
    let fetches = sources.iter().map(|source| async move {
        let playlist = match source.location() {
            Ok(location) => fetcher.fetch(&source.name, &location).await,
            Err(e) => Err(SourceError::unavailable(&source.name, e.to_string())),
        };
        if let Err(e) = &playlist {
            warn!("{}", e);
        }
        SourceInput {
            name: source.name.clone(),
            selection: source.selection(),
            playlist,
        }
    });

    join_all(fetches).await
}
