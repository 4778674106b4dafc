//! Error type definitions for the playlist merger
//!
//! Only [`AppError::NoChannelsProduced`] is meant to abort a run. Everything
//! described by [`SourceError`] is recorded and the run degrades gracefully.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Per-source and per-entry failures that escaped their stage
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Invalid configuration or rule table
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Every channel was filtered out, skipped or dropped
    #[error(
        "No channels produced from {sources} source(s): {parsed} entries parsed, {blacklisted} blacklisted, {dropped_dead} channels dropped as dead"
    )]
    NoChannelsProduced {
        sources: usize,
        parsed: usize,
        blacklisted: usize,
        dropped_dead: usize,
    },

    /// Filesystem errors while reading config or writing output
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors tied to one source, one entry or one probe
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The raw text for a source could not be obtained
    #[error("Source unavailable: {origin} - {message}")]
    Unavailable { origin: String, message: String },

    /// A metadata line without a resolvable play-URL or name
    #[error("Malformed entry at line {line}: {reason}")]
    MalformedEntry { line: usize, reason: String },

    /// A liveness probe exceeded its own timeout
    #[error("Probe timeout: {url}")]
    ProbeTimeout { url: String },

    /// A liveness probe completed with an error or non-success status
    #[error("Probe failed: {url} - {message}")]
    ProbeFailure { url: String, message: String },
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the run failed because nothing was left to publish
    pub fn is_empty_output(&self) -> bool {
        matches!(self, Self::NoChannelsProduced { .. })
    }
}

impl SourceError {
    /// Create a source unavailable error
    pub fn unavailable<O: Into<String>, M: Into<String>>(origin: O, message: M) -> Self {
        Self::Unavailable {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Create a malformed entry error
    pub fn malformed<R: Into<String>>(line: usize, reason: R) -> Self {
        Self::MalformedEntry {
            line,
            reason: reason.into(),
        }
    }

    /// Create a probe timeout error
    pub fn probe_timeout<U: Into<String>>(url: U) -> Self {
        Self::ProbeTimeout { url: url.into() }
    }

    /// Create a probe failure error
    pub fn probe_failure<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::ProbeFailure {
            url: url.into(),
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::internal(format!("failed to serialize config: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_no_channels_is_empty_output() {
        let err = AppError::NoChannelsProduced {
            sources: 2,
            parsed: 10,
            blacklisted: 10,
            dropped_dead: 0,
        };
        assert!(err.is_empty_output());
        assert!(!AppError::configuration("bad").is_empty_output());
    }

    #[test]
    fn test_source_error_messages() {
        let err = SourceError::malformed(12, "no play-URL before next #EXTINF");
        assert_eq!(
            err.to_string(),
            "Malformed entry at line 12: no play-URL before next #EXTINF"
        );

        let err = SourceError::unavailable("bb", "HTTP 503");
        assert_eq!(err.to_string(), "Source unavailable: bb - HTTP 503");
    }
}
