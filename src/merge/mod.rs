//! Merge pipeline
//!
//! [`MergeEngine::run`] takes every fetched source through the same stages:
//! parse, select, canonicalize, blacklist, merge, then classify and sort the
//! logical channels, optionally probe their URLs and drop channels whose URLs
//! are all dead. The result is a [`MergedPlaylist`] plus the [`RunSummary`]
//! counters for the run.

use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{debug, info, trace, warn};

pub mod filter_engine;
pub mod generator;
pub mod store;

pub use filter_engine::{Blacklist, Classification, RuleEngine, sort_channels};
pub use generator::PlaylistGenerator;
pub use store::{MergeOutcome, ReconciliationStore};

use crate::data_mapping::IdentityNormalizer;
use crate::errors::{AppError, AppResult};
use crate::ingestor::M3uParser;
use crate::models::{
    Attributes, HEADER_URL_TVG, HEADER_X_TVG_URL, LivenessStatus, LogicalChannel, MergedPlaylist,
    RuleSet, RunSummary, SourcePlaylist,
};
use crate::services::LivenessProber;
use crate::sources::{SourceInput, SourceSelection};

/// Output of a successful run
#[derive(Debug, Clone)]
pub struct MergeRun {
    pub playlist: MergedPlaylist,
    pub summary: RunSummary,
}

/// Runs the whole merge for one rule set
pub struct MergeEngine {
    rules_version: String,
    normalizer: IdentityNormalizer,
    rules: RuleEngine,
    prober: Option<LivenessProber>,
    epg_url: Option<String>,
    epg_candidates: Vec<String>,
}

/// Mutable state threaded through ingestion of all sources
#[derive(Default)]
struct Ingestion {
    store: ReconciliationStore,
    header: Attributes,
    /// EPG references advertised by source headers, in source order
    epg_refs: Vec<String>,
    blacklisted_keys: BTreeSet<String>,
}

impl MergeEngine {
    /// Compile the rule tables; invalid patterns are a configuration error
    pub fn new(rules: &RuleSet) -> AppResult<Self> {
        Ok(Self {
            rules_version: rules.version.clone(),
            normalizer: IdentityNormalizer::new(&rules.normalization)?,
            rules: RuleEngine::new(rules)?,
            prober: None,
            epg_url: None,
            epg_candidates: Vec::new(),
        })
    }

    /// Enable the liveness stage
    pub fn with_prober(mut self, prober: LivenessProber) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Replace the EPG reference of the merged header
    pub fn with_epg_url(mut self, epg_url: Option<String>) -> Self {
        self.epg_url = epg_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        self
    }

    /// Extra EPG locations tried after the ones advertised by sources
    pub fn with_epg_candidates(mut self, candidates: &[String]) -> Self {
        self.epg_candidates = candidates
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        self
    }

    pub async fn run(&self, sources: &[SourceInput]) -> AppResult<MergeRun> {
        let mut summary = RunSummary::new(self.rules_version.as_str());
        let mut ingestion = Ingestion::default();

        info!(
            "Starting merge of {} sources with rules version {}",
            sources.len(),
            self.rules_version
        );

        for source in sources {
            summary.sources_processed += 1;
            match &source.playlist {
                Ok(playlist) => {
                    self.ingest_source(playlist, &source.selection, &mut ingestion, &mut summary)
                }
                Err(e) => {
                    summary.sources_unavailable += 1;
                    warn!("Skipping source '{}': {}", source.name, e);
                }
            }
        }

        summary.channels_blacklisted = ingestion.blacklisted_keys.len();

        let mut channels = ingestion.store.into_channels();
        summary.channels_merged = channels.len();
        for channel in &mut channels {
            self.rules.apply_classification(channel);
        }
        let mut channels = sort_channels(channels);

        if let Some(prober) = &self.prober {
            self.apply_liveness(prober, &mut channels, &mut summary).await;
        }

        let before_drop = channels.len();
        channels.retain(|channel| {
            let all_dead = channel.is_all_dead();
            if all_dead {
                debug!("Dropping '{}': every URL is dead", channel.display_name);
            }
            !all_dead
        });
        summary.channels_dropped_dead = before_drop - channels.len();

        if channels.is_empty() {
            return Err(AppError::NoChannelsProduced {
                sources: summary.sources_processed,
                parsed: summary.entries_parsed,
                blacklisted: summary.entries_blacklisted,
                dropped_dead: summary.channels_dropped_dead,
            });
        }

        let header = self.merge_header(ingestion.header, &ingestion.epg_refs).await;
        summary.epg_url = header
            .get(HEADER_URL_TVG)
            .or_else(|| header.get(HEADER_X_TVG_URL))
            .cloned();
        summary.channels_written = channels.len();
        summary.finished_at = Some(Utc::now());

        log_summary(&summary);

        Ok(MergeRun {
            playlist: MergedPlaylist::new(header, channels),
            summary,
        })
    }

    fn ingest_source(
        &self,
        playlist: &SourcePlaylist,
        selection: &SourceSelection,
        ingestion: &mut Ingestion,
        summary: &mut RunSummary,
    ) {
        let parser = M3uParser::new(&playlist.origin, &playlist.content);

        for (key, value) in parser.header() {
            if value.is_empty() {
                continue;
            }
            if (key == HEADER_URL_TVG || key == HEADER_X_TVG_URL)
                && !ingestion.epg_refs.contains(&value)
            {
                ingestion.epg_refs.push(value.clone());
            }
            ingestion.header.entry(key).or_insert(value);
        }

        let mut accepted = 0usize;
        let mut created = 0usize;

        for item in parser.entries() {
            let mut entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    summary.entries_skipped_malformed += 1;
                    debug!("Source '{}': {}", playlist.origin, e);
                    continue;
                }
            };
            summary.entries_parsed += 1;

            if !selection.accepts(&entry) {
                summary.entries_unselected += 1;
                continue;
            }

            let identity = self.normalizer.canonicalize(&entry.name, entry.group());

            let blacklist = self.rules.blacklist();
            if let Some(phrase) = blacklist
                .matching_phrase(&entry.name)
                .or_else(|| blacklist.matching_phrase(&identity.display_name))
            {
                trace!("Blacklisted '{}' (matched '{}')", entry.name, phrase);
                summary.entries_blacklisted += 1;
                ingestion.blacklisted_keys.insert(identity.key);
                continue;
            }

            if selection.limit_reached(accepted) {
                summary.entries_unselected += 1;
                continue;
            }
            accepted += 1;

            selection.apply_group(&mut entry);

            match ingestion.store.merge(&identity, &entry) {
                MergeOutcome::Created => created += 1,
                MergeOutcome::UrlAdded => {}
                MergeOutcome::DuplicateUrl => summary.urls_merged += 1,
            }
        }

        info!(
            "Source '{}': {} entries accepted, {} new channels",
            playlist.origin, accepted, created
        );
    }

    async fn apply_liveness(
        &self,
        prober: &LivenessProber,
        channels: &mut [LogicalChannel],
        summary: &mut RunSummary,
    ) {
        let report = prober.probe_channels(channels).await;

        for channel in channels.iter_mut() {
            for url in &mut channel.urls {
                url.status = report.status(&url.url);
            }
        }

        summary.urls_probed = report.submitted;
        summary.urls_alive = report.count(LivenessStatus::Alive);
        summary.urls_dead = report.count(LivenessStatus::Dead);
        summary.urls_unknown = report.count(LivenessStatus::Unknown);
    }

    /// Resolve the EPG reference of the merged header.
    ///
    /// A configured URL always wins. With probing enabled the first candidate
    /// (source references, then configured ones) that serves a guide is used,
    /// and the reference is dropped when none does. Otherwise the first source
    /// reference is kept, falling back to the first configured candidate.
    async fn merge_header(&self, mut header: Attributes, source_refs: &[String]) -> Attributes {
        let epg_url = match (&self.epg_url, &self.prober) {
            (Some(url), _) => Some(url.clone()),
            (None, Some(prober)) => {
                let candidates: Vec<String> = source_refs
                    .iter()
                    .chain(&self.epg_candidates)
                    .cloned()
                    .collect();
                if candidates.is_empty() {
                    return header;
                }
                let selected = prober.select_guide(&candidates).await;
                if selected.is_none() {
                    header.remove(HEADER_URL_TVG);
                    header.remove(HEADER_X_TVG_URL);
                }
                selected
            }
            (None, None) => {
                if header.contains_key(HEADER_URL_TVG) || header.contains_key(HEADER_X_TVG_URL) {
                    return header;
                }
                self.epg_candidates.first().cloned()
            }
        };

        if let Some(url) = epg_url {
            header.insert(HEADER_URL_TVG.to_string(), url.clone());
            header.insert(HEADER_X_TVG_URL.to_string(), url);
        }
        header
    }
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Merge finished: {} sources ({} unavailable), {} entries parsed, {} malformed, {} unselected",
        summary.sources_processed,
        summary.sources_unavailable,
        summary.entries_parsed,
        summary.entries_skipped_malformed,
        summary.entries_unselected
    );
    info!(
        "{} entries blacklisted across {} channels; {} channels merged, {} duplicate URLs folded",
        summary.entries_blacklisted,
        summary.channels_blacklisted,
        summary.channels_merged,
        summary.urls_merged
    );
    if summary.urls_probed > 0 {
        info!(
            "Probed {} URLs: {} alive, {} dead, {} unknown; {} channels dropped",
            summary.urls_probed,
            summary.urls_alive,
            summary.urls_dead,
            summary.urls_unknown,
            summary.channels_dropped_dead
        );
    }
    info!("{} channels written", summary.channels_written);
}
