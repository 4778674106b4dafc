use tracing::debug;

use crate::data_mapping::PatternMatcher;
use crate::errors::AppResult;
use crate::models::{
    ATTR_GROUP_TITLE, ClassificationRule, LOWEST_RANK, LogicalChannel, MatchField, RuleSet,
};

/// Case-insensitive phrase blacklist
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    phrases: Vec<(String, String)>,
}

impl Blacklist {
    pub fn new(phrases: &[String]) -> Self {
        let phrases = phrases
            .iter()
            .map(|phrase| phrase.trim())
            .filter(|phrase| !phrase.is_empty())
            .map(|phrase| (phrase.to_string(), phrase.to_lowercase()))
            .collect();
        Self { phrases }
    }

    /// The first phrase contained in `name`, if any
    pub fn matching_phrase(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.phrases
            .iter()
            .find(|(_, lowered)| name.contains(lowered.as_str()))
            .map(|(original, _)| original.as_str())
    }

    pub fn matches(&self, name: &str) -> bool {
        self.matching_phrase(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// Result of classifying a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification<'a> {
    pub rank: i32,
    pub assign_group: Option<&'a str>,
}

#[derive(Debug, Clone)]
struct CompiledClassificationRule {
    matcher: PatternMatcher,
    field: MatchField,
    rank: i32,
    assign_group: Option<String>,
}

impl CompiledClassificationRule {
    fn compile(rule: &ClassificationRule) -> AppResult<Self> {
        Ok(Self {
            matcher: PatternMatcher::new(rule.match_kind, &rule.pattern)?,
            field: rule.field,
            rank: rule.rank,
            assign_group: rule
                .assign_group
                .as_ref()
                .map(|group| group.trim().to_string())
                .filter(|group| !group.is_empty()),
        })
    }

    fn matches(&self, channel: &LogicalChannel) -> bool {
        match self.field {
            MatchField::Name => {
                self.matcher.is_match(&channel.display_name)
                    || channel
                        .provenance
                        .iter()
                        .any(|name| self.matcher.is_match(name))
            }
            MatchField::Group => channel
                .group()
                .is_some_and(|group| self.matcher.is_match(group)),
        }
    }
}

/// Blacklist filtering and rank classification
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    blacklist: Blacklist,
    priority: Vec<CompiledClassificationRule>,
}

impl RuleEngine {
    pub fn new(rules: &RuleSet) -> AppResult<Self> {
        let priority = rules
            .priority
            .iter()
            .map(CompiledClassificationRule::compile)
            .collect::<AppResult<Vec<_>>>()?;

        debug!(
            "Rule engine ready: {} blacklist phrases, {} priority rules",
            rules.blacklist.len(),
            priority.len()
        );

        Ok(Self {
            blacklist: Blacklist::new(&rules.blacklist),
            priority,
        })
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Whether the channel's display name or any provenance name is blacklisted
    pub fn is_blacklisted(&self, channel: &LogicalChannel) -> bool {
        self.blacklist.matches(&channel.display_name)
            || channel
                .provenance
                .iter()
                .any(|name| self.blacklist.matches(name))
    }

    /// First matching priority rule, or the lowest rank
    pub fn classify(&self, channel: &LogicalChannel) -> Classification<'_> {
        self.priority
            .iter()
            .find(|rule| rule.matches(channel))
            .map(|rule| Classification {
                rank: rule.rank,
                assign_group: rule.assign_group.as_deref(),
            })
            .unwrap_or(Classification {
                rank: LOWEST_RANK,
                assign_group: None,
            })
    }

    /// Store the rank on the channel and apply any group reassignment
    pub fn apply_classification(&self, channel: &mut LogicalChannel) {
        let classification = self.classify(channel);
        channel.rank = classification.rank;
        if let Some(group) = classification.assign_group {
            channel
                .attributes
                .insert(ATTR_GROUP_TITLE.to_string(), group.to_string());
        }
    }
}

/// Stable sort by `(rank, display name, key)` ascending
pub fn sort_channels(mut channels: Vec<LogicalChannel>) -> Vec<LogicalChannel> {
    channels.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    channels
}
