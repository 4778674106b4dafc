use std::collections::{BTreeSet, HashMap};

use crate::data_mapping::CanonicalIdentity;
use crate::models::{
    Attributes, ChannelUrl, LOWEST_RANK, LivenessStatus, LogicalChannel, RawChannelEntry,
};

/// What a call to [`ReconciliationStore::merge`] changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new logical channel was created for the key
    Created,
    /// The entry's URL was appended to an existing channel
    UrlAdded,
    /// The URL was already known; only provenance and empty attributes may change
    DuplicateUrl,
}

/// Keyed collection of logical channels.
///
/// Holds at most one channel per canonical key and keeps first-seen order so
/// snapshots are deterministic. `merge` is the only mutation path.
#[derive(Debug, Default)]
pub struct ReconciliationStore {
    index: HashMap<String, usize>,
    channels: Vec<LogicalChannel>,
}

impl ReconciliationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, identity: &CanonicalIdentity, entry: &RawChannelEntry) -> MergeOutcome {
        if let Some(&position) = self.index.get(&identity.key) {
            let channel = &mut self.channels[position];
            channel.provenance.insert(entry.name.trim().to_string());
            fill_empty_attributes(&mut channel.attributes, &entry.attributes);

            if channel.contains_url(&entry.url) {
                return MergeOutcome::DuplicateUrl;
            }
            channel.urls.push(channel_url(entry));
            return MergeOutcome::UrlAdded;
        }

        let mut attributes = Attributes::new();
        fill_empty_attributes(&mut attributes, &entry.attributes);

        self.index.insert(identity.key.clone(), self.channels.len());
        self.channels.push(LogicalChannel {
            key: identity.key.clone(),
            display_name: identity.display_name.clone(),
            provenance: BTreeSet::from([entry.name.trim().to_string()]),
            urls: vec![channel_url(entry)],
            attributes,
            duration: entry.duration.clone(),
            rank: LOWEST_RANK,
        });
        MergeOutcome::Created
    }

    pub fn get(&self, key: &str) -> Option<&LogicalChannel> {
        self.index.get(key).map(|&position| &self.channels[position])
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Current channels in first-seen order
    pub fn snapshot(&self) -> Vec<LogicalChannel> {
        self.channels.clone()
    }

    pub fn into_channels(self) -> Vec<LogicalChannel> {
        self.channels
    }
}

fn channel_url(entry: &RawChannelEntry) -> ChannelUrl {
    ChannelUrl {
        url: entry.url.clone(),
        origin: entry.origin.clone(),
        status: LivenessStatus::Unknown,
    }
}

/// First write wins; a later non-empty value only fills an empty slot
fn fill_empty_attributes(target: &mut Attributes, incoming: &Attributes) {
    for (key, value) in incoming {
        if value.is_empty() {
            continue;
        }
        let slot = target.entry(key.clone()).or_default();
        if slot.is_empty() {
            slot.clone_from(value);
        }
    }
}
