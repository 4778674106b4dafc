use regex::{Regex, RegexBuilder};

use crate::errors::{AppError, AppResult};
use crate::models::MatchKind;

/// Upper bound on compiled pattern size; rule tables are user-supplied
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A compiled rule pattern
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    kind: MatchKind,
    needle: String,
    regex: Option<Regex>,
}

impl PatternMatcher {
    pub fn new(kind: MatchKind, pattern: &str) -> AppResult<Self> {
        let regex = match kind {
            MatchKind::Pattern => Some(
                RegexBuilder::new(pattern)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(|e| {
                        AppError::configuration(format!("invalid pattern '{pattern}': {e}"))
                    })?,
            ),
            MatchKind::Exact | MatchKind::Substring => None,
        };

        let needle = pattern.trim().to_lowercase();
        if needle.is_empty() {
            return Err(AppError::configuration(format!(
                "empty {kind} pattern is not allowed"
            )));
        }

        Ok(Self {
            kind,
            needle,
            regex,
        })
    }

    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    pub fn is_match(&self, value: &str) -> bool {
        match self.kind {
            MatchKind::Exact => value.trim().to_lowercase() == self.needle,
            MatchKind::Substring => value.to_lowercase().contains(&self.needle),
            MatchKind::Pattern => self
                .regex
                .as_ref()
                .is_some_and(|regex| regex.is_match(value)),
        }
    }
}
