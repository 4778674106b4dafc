use serde::{Deserialize, Serialize};

/// How a rule pattern is compared with a channel field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Case-insensitive equality of the trimmed strings
    Exact,
    /// Case-insensitive containment
    Substring,
    /// Regular expression, evaluated as written
    Pattern,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchKind::Exact => write!(f, "exact"),
            MatchKind::Substring => write!(f, "substring"),
            MatchKind::Pattern => write!(f, "pattern"),
        }
    }
}

/// Which channel field a rule looks at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    #[default]
    Name,
    Group,
}

/// Maps raw channel names onto one canonical identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationRule {
    #[serde(rename = "match")]
    pub match_kind: MatchKind,
    pub pattern: String,
    #[serde(default)]
    pub field: MatchField,
    /// Only entries coming from this group-title are considered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_group: Option<String>,
    pub key: String,
    pub display_name: String,
}

/// Assigns a sort rank, and optionally a group-title, to a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    #[serde(rename = "match")]
    pub match_kind: MatchKind,
    pub pattern: String,
    #[serde(default)]
    pub field: MatchField,
    pub rank: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_group: Option<String>,
}

/// The versioned rule configuration handed to the merge engine.
///
/// Rule order is significant in every table: the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_rules_version")]
    pub version: String,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub normalization: Vec<NormalizationRule>,
    #[serde(default)]
    pub priority: Vec<ClassificationRule>,
}

fn default_rules_version() -> String {
    "1".to_string()
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            version: default_rules_version(),
            blacklist: Vec::new(),
            normalization: Vec::new(),
            priority: Vec::new(),
        }
    }
}
