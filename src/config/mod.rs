use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub mod duration_serde;

use crate::data_mapping::IdentityNormalizer;
use crate::errors::{AppError, AppResult};
use crate::merge::RuleEngine;
use crate::models::RuleSet;
use crate::sources::{SourceLocation, SourceSelection};

const DEFAULT_USER_AGENT: &str = concat!("m3u-merge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub rules: RuleSet,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    /// Replaces `url-tvg` and `x-tvg-url` taken from the sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epg_url: Option<String>,
    /// Fallback EPG locations, tried after those advertised by the sources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub epg_candidates: Vec<String>,
    /// Write sequential `tvg-chno` attributes
    #[serde(default)]
    pub number_channels: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    /// Every distinct URL is checked
    #[default]
    PerUrl,
    /// A channel's URLs are checked in order until one answers
    PerChannel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: ProbeMode,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-request timeout; exceeding it marks the URL dead
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub timeout: Duration,
    /// Cap on the whole probing phase; unfinished URLs stay unknown
    #[serde(default = "default_probe_deadline", with = "duration_serde")]
    pub deadline: Duration,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// One upstream playlist and the selection applied to its entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Overrides `group-title` on every accepted entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("./merged.m3u")
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_max_concurrency() -> usize {
    8
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_probe_deadline() -> Duration {
    Duration::from_secs(120)
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            epg_url: None,
            epg_candidates: Vec::new(),
            number_channels: false,
            summary_path: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: ProbeMode::default(),
            max_concurrency: default_max_concurrency(),
            timeout: default_probe_timeout(),
            deadline: default_probe_deadline(),
            retries: 0,
            user_agent: default_user_agent(),
        }
    }
}

impl SourceConfig {
    pub fn location(&self) -> AppResult<SourceLocation> {
        match (&self.url, &self.path) {
            (Some(url), None) => Ok(SourceLocation::Url(url.clone())),
            (None, Some(path)) => Ok(SourceLocation::Path(path.clone())),
            (Some(_), Some(_)) => Err(AppError::configuration(format!(
                "source '{}' sets both url and path",
                self.name
            ))),
            (None, None) => Err(AppError::configuration(format!(
                "source '{}' needs a url or a path",
                self.name
            ))),
        }
    }

    pub fn selection(&self) -> SourceSelection {
        SourceSelection {
            include_groups: self.include_groups.clone(),
            include_keywords: self.include_keywords.clone(),
            limit: self.limit,
            group: self.group.clone(),
        }
    }
}

impl Config {
    pub fn from_toml_str(contents: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file, or write and return the default configuration when it is missing
    pub fn load_from_file(config_file: &Path) -> AppResult<Self> {
        if config_file.exists() {
            let contents = std::fs::read_to_string(config_file)?;
            let config = Self::from_toml_str(&contents)?;
            info!(
                "Loaded config from {} ({} sources, rules version {})",
                config_file.display(),
                config.sources.len(),
                config.rules.version
            );
            Ok(config)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            if let Some(parent) = config_file.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file.display());
            Ok(default_config)
        }
    }

    /// Reject configurations the engine could not run with, including invalid rule patterns
    pub fn validate(&self) -> AppResult<()> {
        IdentityNormalizer::new(&self.rules.normalization)?;
        RuleEngine::new(&self.rules)?;

        if self.probe.max_concurrency == 0 {
            return Err(AppError::configuration(
                "probe.max_concurrency must be at least 1",
            ));
        }

        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(AppError::configuration("every source needs a name"));
            }
            source.location()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchKind;

    const FULL_CONFIG: &str = r#"
        [output]
        path = "/srv/iptv/merged.m3u"
        epg_url = "http://epg.example.com/e.xml.gz"
        epg_candidates = ["http://epg.example.com/backup.xml"]
        number_channels = true

        [fetch]
        timeout = "10s"

        [probe]
        enabled = true
        mode = "per_channel"
        max_concurrency = 16
        timeout = "3s"
        deadline = "2m"
        retries = 1

        [rules]
        version = "2024-06-01"
        blacklist = ["CNBC"]

        [[rules.normalization]]
        match = "exact"
        pattern = "NOW News"
        key = "now_news"
        display_name = "NOW新闻台"

        [[rules.priority]]
        match = "substring"
        pattern = "凤凰"
        rank = 0

        [[sources]]
        name = "aktv"
        url = "http://example.com/aktv.m3u"
        include_groups = ["港澳台直播"]
        limit = 50

        [[sources]]
        name = "local"
        path = "./playlists/local.m3u"
        group = "Local"
    "#;

    #[test]
    fn test_parses_full_config() {
        let config = Config::from_toml_str(FULL_CONFIG).unwrap();

        assert_eq!(config.output.path, PathBuf::from("/srv/iptv/merged.m3u"));
        assert!(config.output.number_channels);
        assert_eq!(
            config.output.epg_candidates,
            vec!["http://epg.example.com/backup.xml".to_string()]
        );
        assert_eq!(config.fetch.timeout, Duration::from_secs(10));
        assert_eq!(config.fetch.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.probe.mode, ProbeMode::PerChannel);
        assert_eq!(config.probe.deadline, Duration::from_secs(120));
        assert_eq!(config.rules.normalization[0].match_kind, MatchKind::Exact);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(
            config.sources[0].location().unwrap(),
            SourceLocation::Url("http://example.com/aktv.m3u".to_string())
        );
        assert_eq!(config.sources[1].selection().group.as_deref(), Some("Local"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();

        assert!(!config.probe.enabled);
        assert_eq!(config.probe.max_concurrency, 8);
        assert_eq!(config.rules.version, "1");
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_invalid_regex_is_a_configuration_error() {
        let err = Config::from_toml_str(
            r#"
            [[rules.priority]]
            match = "pattern"
            pattern = "(unclosed"
            rank = 1
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_source_needs_exactly_one_location() {
        let err = Config::from_toml_str(
            r#"
            [[sources]]
            name = "both"
            url = "http://example.com/a.m3u"
            path = "a.m3u"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("both url and path"));

        assert!(Config::from_toml_str("[[sources]]\nname = \"none\"").is_err());
    }

    #[test]
    fn test_missing_file_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("m3u-merge.toml");

        let config = Config::load_from_file(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.output.path, default_output_path());

        let reloaded = Config::load_from_file(&path).unwrap();
        assert_eq!(reloaded.probe.timeout, config.probe.timeout);
        assert_eq!(reloaded.fetch.user_agent, config.fetch.user_agent);
    }
}
