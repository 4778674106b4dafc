//! Canonical channel identity
//!
//! [`IdentityNormalizer::canonicalize`] decides which logical channel a raw
//! entry belongs to. Rules are tried in declared order and the first match
//! wins, so a name that two rules would accept always resolves to the rule
//! listed first. The result depends only on the name, the source group and
//! the rule table.

use tracing::debug;

use super::matcher::PatternMatcher;
use crate::errors::{AppError, AppResult};
use crate::models::{MatchField, NormalizationRule};

/// Canonical key and display name of a logical channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalIdentity {
    pub key: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
struct CompiledNormalizationRule {
    matcher: PatternMatcher,
    field: MatchField,
    source_group: Option<String>,
    key: String,
    display_name: String,
}

impl CompiledNormalizationRule {
    fn applies_to(&self, raw_name: &str, source_group: Option<&str>) -> bool {
        if let Some(required) = &self.source_group {
            let matches_group = source_group
                .is_some_and(|group| group.trim().eq_ignore_ascii_case(required.trim()));
            if !matches_group {
                return false;
            }
        }

        match self.field {
            MatchField::Name => self.matcher.is_match(raw_name),
            MatchField::Group => source_group.is_some_and(|group| self.matcher.is_match(group)),
        }
    }
}

/// Maps raw names onto canonical identities with an ordered rule table
#[derive(Debug, Clone, Default)]
pub struct IdentityNormalizer {
    rules: Vec<CompiledNormalizationRule>,
}

impl IdentityNormalizer {
    pub fn new(rules: &[NormalizationRule]) -> AppResult<Self> {
        let mut compiled = Vec::with_capacity(rules.len());

        for (index, rule) in rules.iter().enumerate() {
            let key = rule.key.trim();
            if key.is_empty() {
                return Err(AppError::configuration(format!(
                    "normalization rule #{} ('{}') has an empty key",
                    index + 1,
                    rule.pattern
                )));
            }

            let display_name = match rule.display_name.trim() {
                "" => key,
                name => name,
            };

            compiled.push(CompiledNormalizationRule {
                matcher: PatternMatcher::new(rule.match_kind, &rule.pattern)?,
                field: rule.field,
                source_group: rule.source_group.clone(),
                key: key.to_string(),
                display_name: display_name.to_string(),
            });
        }

        debug!("Compiled {} normalization rules", compiled.len());
        Ok(Self { rules: compiled })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn canonicalize(&self, raw_name: &str, source_group: Option<&str>) -> CanonicalIdentity {
        self.rules
            .iter()
            .find(|rule| rule.applies_to(raw_name, source_group))
            .map(|rule| CanonicalIdentity {
                key: rule.key.clone(),
                display_name: rule.display_name.clone(),
            })
            .unwrap_or_else(|| CanonicalIdentity {
                key: default_key(raw_name),
                display_name: raw_name.trim().to_string(),
            })
    }
}

/// Trimmed, whitespace-collapsed, lowercased name
pub fn default_key(raw_name: &str) -> String {
    raw_name
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}
