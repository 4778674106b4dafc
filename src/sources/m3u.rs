//! HTTP and local-file fetchers for playlist sources

use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use tracing::{debug, info};

use super::traits::{SourceFetcher, SourceLocation};
use crate::config::FetchConfig;
use crate::errors::{AppError, AppResult, SourceError, SourceResult};
use crate::models::SourcePlaylist;

/// Downloads playlists over HTTP(S)
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| AppError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub async fn fetch_url(&self, origin: &str, url: &str) -> SourceResult<SourcePlaylist> {
        debug!("Fetching source '{}' from {}", origin, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| SourceError::unavailable(origin, e.to_string()))?;

        let content = response
            .text()
            .await
            .map_err(|e| SourceError::unavailable(origin, e.to_string()))?;

        info!("Fetched source '{}' ({} bytes)", origin, content.len());
        Ok(SourcePlaylist::new(origin, content))
    }
}

/// Reads playlists from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl FileFetcher {
    pub async fn read_path(&self, origin: &str, path: &Path) -> SourceResult<SourcePlaylist> {
        debug!("Reading source '{}' from {}", origin, path.display());

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SourceError::unavailable(origin, format!("{}: {e}", path.display())))?;
        let content = String::from_utf8_lossy(&bytes).into_owned();

        info!("Read source '{}' ({} bytes)", origin, content.len());
        Ok(SourcePlaylist::new(origin, content))
    }
}

/// Dispatches on the location kind
pub struct PlaylistFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl PlaylistFetcher {
    pub fn new(config: &FetchConfig) -> AppResult<Self> {
        Ok(Self {
            http: HttpFetcher::new(config)?,
            file: FileFetcher,
        })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, origin: &str, location: &SourceLocation) -> SourceResult<SourcePlaylist> {
        match location {
            SourceLocation::Url(url) => self.fetch_url(origin, url).await,
            SourceLocation::Path(_) => Err(SourceError::unavailable(
                origin,
                format!("{location} is not a URL"),
            )),
        }
    }
}

#[async_trait]
impl SourceFetcher for FileFetcher {
    async fn fetch(&self, origin: &str, location: &SourceLocation) -> SourceResult<SourcePlaylist> {
        match location {
            SourceLocation::Path(path) => self.read_path(origin, path).await,
            SourceLocation::Url(_) => Err(SourceError::unavailable(
                origin,
                format!("{location} is not a local path"),
            )),
        }
    }
}

#[async_trait]
impl SourceFetcher for PlaylistFetcher {
    async fn fetch(&self, origin: &str, location: &SourceLocation) -> SourceResult<SourcePlaylist> {
        match location {
            SourceLocation::Url(_) => self.http.fetch(origin, location).await,
            SourceLocation::Path(_) => self.file.fetch(origin, location).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_file_fetcher_reads_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.m3u");
        std::fs::write(&path, "#EXTM3U\n#EXTINF:-1,TVB\nhttp://a/tvb\n").unwrap();

        let playlist = FileFetcher
            .fetch("local", &SourceLocation::Path(path))
            .await
            .unwrap();

        assert_eq!(playlist.origin, "local");
        assert!(playlist.content.contains("http://a/tvb"));
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let err = FileFetcher
            .fetch("gone", &SourceLocation::Path(PathBuf::from("/nonexistent/x.m3u")))
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Unavailable { ref origin, .. } if origin == "gone"));
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_paths() {
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let result = fetcher
            .fetch("x", &SourceLocation::Path(PathBuf::from("a.m3u")))
            .await;
        assert!(result.is_err());
    }
}
