use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod rules;

pub use rules::*;

/// Attribute mapping of a metadata line (`key="value"` pairs)
pub type Attributes = BTreeMap<String, String>;

pub const ATTR_TVG_ID: &str = "tvg-id";
pub const ATTR_TVG_NAME: &str = "tvg-name";
pub const ATTR_TVG_LOGO: &str = "tvg-logo";
pub const ATTR_TVG_CHNO: &str = "tvg-chno";
pub const ATTR_GROUP_TITLE: &str = "group-title";

pub const HEADER_URL_TVG: &str = "url-tvg";
pub const HEADER_X_TVG_URL: &str = "x-tvg-url";

/// Rank given to channels no classification rule matched
pub const LOWEST_RANK: i32 = i32::MAX;

/// Duration written for live entries
pub const LIVE_DURATION: &str = "-1";

/// Raw text of one fetched source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePlaylist {
    pub origin: String,
    pub content: String,
}

impl SourcePlaylist {
    pub fn new<O: Into<String>, C: Into<String>>(origin: O, content: C) -> Self {
        Self {
            origin: origin.into(),
            content: content.into(),
        }
    }
}

/// One metadata line plus its play-URL, as found in a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChannelEntry {
    pub name: String,
    pub url: String,
    pub duration: String,
    pub attributes: Attributes,
    pub origin: String,
    /// 1-based line of the `#EXTINF` line
    pub line: usize,
}

impl RawChannelEntry {
    pub fn group(&self) -> Option<&str> {
        self.attributes
            .get(ATTR_GROUP_TITLE)
            .map(String::as_str)
            .filter(|group| !group.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessStatus {
    #[default]
    Unknown,
    Alive,
    Dead,
}

impl LivenessStatus {
    /// Alive and unverified URLs are kept
    pub fn is_retained(self) -> bool {
        !matches!(self, LivenessStatus::Dead)
    }
}

impl std::fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LivenessStatus::Unknown => write!(f, "unknown"),
            LivenessStatus::Alive => write!(f, "alive"),
            LivenessStatus::Dead => write!(f, "dead"),
        }
    }
}

/// A play-URL of a logical channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUrl {
    pub url: String,
    pub origin: String,
    pub status: LivenessStatus,
}

/// The merged record of one broadcast channel, possibly backed by many URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalChannel {
    pub key: String,
    pub display_name: String,
    /// Every raw display name that was merged into this channel
    pub provenance: BTreeSet<String>,
    /// Distinct play-URLs in insertion order
    pub urls: Vec<ChannelUrl>,
    pub attributes: Attributes,
    pub duration: String,
    pub rank: i32,
}

impl LogicalChannel {
    pub fn group(&self) -> Option<&str> {
        self.attributes
            .get(ATTR_GROUP_TITLE)
            .map(String::as_str)
            .filter(|group| !group.is_empty())
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.urls.iter().any(|existing| existing.url == url)
    }

    pub fn surviving_urls(&self) -> impl Iterator<Item = &ChannelUrl> {
        self.urls.iter().filter(|url| url.status.is_retained())
    }

    /// True only when there is at least one URL and every URL is dead
    pub fn is_all_dead(&self) -> bool {
        !self.urls.is_empty() && self.surviving_urls().next().is_none()
    }

    /// Total output order: rank, then display name, then key
    pub fn sort_key(&self) -> (i32, &str, &str) {
        (self.rank, self.display_name.as_str(), self.key.as_str())
    }
}

/// Final output of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedPlaylist {
    header: Attributes,
    channels: Vec<LogicalChannel>,
}

impl MergedPlaylist {
    pub fn new(header: Attributes, channels: Vec<LogicalChannel>) -> Self {
        Self { header, channels }
    }

    pub fn header(&self) -> &Attributes {
        &self.header
    }

    pub fn channels(&self) -> &[LogicalChannel] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Counters describing one run, exposed to callers next to the merged text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub rules_version: String,
    pub sources_processed: usize,
    pub sources_unavailable: usize,
    pub entries_parsed: usize,
    pub entries_skipped_malformed: usize,
    pub entries_unselected: usize,
    pub entries_blacklisted: usize,
    pub channels_blacklisted: usize,
    pub channels_merged: usize,
    pub urls_merged: usize,
    pub urls_probed: usize,
    pub urls_alive: usize,
    pub urls_dead: usize,
    pub urls_unknown: usize,
    pub channels_dropped_dead: usize,
    pub channels_written: usize,
    /// EPG reference written to the merged header
    pub epg_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn new<V: Into<String>>(rules_version: V) -> Self {
        Self {
            rules_version: rules_version.into(),
            sources_processed: 0,
            sources_unavailable: 0,
            entries_parsed: 0,
            entries_skipped_malformed: 0,
            entries_unselected: 0,
            entries_blacklisted: 0,
            channels_blacklisted: 0,
            channels_merged: 0,
            urls_merged: 0,
            urls_probed: 0,
            urls_alive: 0,
            urls_dead: 0,
            urls_unknown: 0,
            channels_dropped_dead: 0,
            channels_written: 0,
            epg_url: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}
