use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::AppResult;
use crate::models::{
    ATTR_GROUP_TITLE, ATTR_TVG_CHNO, ATTR_TVG_ID, ATTR_TVG_LOGO, ATTR_TVG_NAME, Attributes,
    HEADER_URL_TVG, HEADER_X_TVG_URL, LogicalChannel, MergedPlaylist,
};

/// Attributes written first, in this order; the rest follow sorted by key
const ATTRIBUTE_ORDER: &[&str] = &[
    ATTR_TVG_ID,
    ATTR_TVG_NAME,
    ATTR_TVG_LOGO,
    ATTR_TVG_CHNO,
    ATTR_GROUP_TITLE,
];

const HEADER_ORDER: &[&str] = &[HEADER_URL_TVG, HEADER_X_TVG_URL];

/// Serializes a merged playlist back to extended-M3U text
#[derive(Debug, Clone, Default)]
pub struct PlaylistGenerator {
    number_channels: bool,
}

impl PlaylistGenerator {
    pub fn new(number_channels: bool) -> Self {
        Self { number_channels }
    }

    /// Deterministic: identical playlists always produce identical text
    pub fn generate(&self, playlist: &MergedPlaylist) -> String {
        let mut m3u = String::from("#EXTM3U");
        write_attributes(&mut m3u, playlist.header(), HEADER_ORDER);
        m3u.push('\n');

        let mut channel_number = 0;
        for channel in playlist.channels() {
            if channel.surviving_urls().next().is_none() {
                continue;
            }
            channel_number += 1;
            self.write_channel(&mut m3u, channel, channel_number);
        }

        debug!("Generated playlist with {} channels", channel_number);
        m3u
    }

    fn write_channel(&self, m3u: &mut String, channel: &LogicalChannel, channel_number: usize) {
        let mut attributes = channel.attributes.clone();
        if self.number_channels {
            attributes.insert(ATTR_TVG_CHNO.to_string(), channel_number.to_string());
        }

        m3u.push_str("#EXTINF:");
        m3u.push_str(&channel.duration);
        write_attributes(m3u, &attributes, ATTRIBUTE_ORDER);
        m3u.push(',');
        m3u.push_str(&single_line(&channel.display_name));
        m3u.push('\n');

        for url in channel.surviving_urls() {
            m3u.push_str(&url.url);
            m3u.push('\n');
        }
    }

    /// Write the playlist next to its final path and rename it into place
    pub async fn save(&self, path: &Path, content: &str) -> AppResult<PathBuf> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = path.with_extension("m3u.tmp");
        tokio::fs::write(&staging, content).await?;
        tokio::fs::rename(&staging, path).await?;

        info!("Wrote playlist to {} ({} bytes)", path.display(), content.len());
        Ok(path.to_path_buf())
    }
}

fn write_attributes(out: &mut String, attributes: &Attributes, order: &[&str]) {
    let leading = order
        .iter()
        .filter_map(|key| attributes.get_key_value(*key));
    let rest = attributes
        .iter()
        .filter(|(key, _)| !order.contains(&key.as_str()));

    for (key, value) in leading.chain(rest) {
        if value.is_empty() {
            continue;
        }
        // Writing to a String cannot fail
        let _ = write!(out, " {}=\"{}\"", key, value.replace('"', "'"));
    }
}

/// Readers take the text after the last comma as the name
fn single_line(name: &str) -> String {
    name.replace(", ", " ").replace([',', '\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestor::M3uParser;
    use crate::models::{ChannelUrl, LOWEST_RANK, LivenessStatus};
    use std::collections::BTreeSet;

    fn channel(key: &str, name: &str, urls: &[(&str, LivenessStatus)]) -> LogicalChannel {
        LogicalChannel {
            key: key.to_string(),
            display_name: name.to_string(),
            provenance: BTreeSet::new(),
            urls: urls
                .iter()
                .map(|(url, status)| ChannelUrl {
                    url: url.to_string(),
                    origin: "test".to_string(),
                    status: *status,
                })
                .collect(),
            attributes: Attributes::new(),
            duration: "-1".to_string(),
            rank: LOWEST_RANK,
        }
    }

    #[test]
    fn test_generates_header_and_ordered_attributes() {
        let mut header = Attributes::new();
        header.insert("x-tvg-url".to_string(), "http://epg/x.xml".to_string());
        header.insert("url-tvg".to_string(), "http://epg/u.xml".to_string());
        header.insert("catchup".to_string(), "append".to_string());

        let mut now = channel(
            "now_news",
            "NOW新闻台",
            &[
                ("http://a/now.m3u8", LivenessStatus::Unknown),
                ("http://b/now.m3u8", LivenessStatus::Alive),
            ],
        );
        now.attributes
            .insert("group-title".to_string(), "HK".to_string());
        now.attributes
            .insert("tvg-id".to_string(), "now.hk".to_string());
        now.attributes
            .insert("aaa-custom".to_string(), "1".to_string());

        let playlist = MergedPlaylist::new(header, vec![now]);
        let text = PlaylistGenerator::default().generate(&playlist);

        assert_eq!(
            text,
            "#EXTM3U url-tvg=\"http://epg/u.xml\" x-tvg-url=\"http://epg/x.xml\" catchup=\"append\"\n\
             #EXTINF:-1 tvg-id=\"now.hk\" group-title=\"HK\" aaa-custom=\"1\",NOW新闻台\n\
             http://a/now.m3u8\n\
             http://b/now.m3u8\n"
        );
    }

    #[test]
    fn test_omits_dead_urls_and_empty_channels() {
        let playlist = MergedPlaylist::new(
            Attributes::new(),
            vec![
                channel(
                    "a",
                    "A",
                    &[
                        ("http://a/1", LivenessStatus::Dead),
                        ("http://a/2", LivenessStatus::Alive),
                    ],
                ),
                channel("b", "B", &[("http://b/1", LivenessStatus::Dead)]),
            ],
        );

        let text = PlaylistGenerator::default().generate(&playlist);
        assert_eq!(text, "#EXTM3U\n#EXTINF:-1,A\nhttp://a/2\n");
    }

    #[test]
    fn test_numbers_channels_when_enabled() {
        let playlist = MergedPlaylist::new(
            Attributes::new(),
            vec![
                channel("a", "A", &[("http://a", LivenessStatus::Unknown)]),
                channel("b", "B", &[("http://b", LivenessStatus::Unknown)]),
            ],
        );

        let text = PlaylistGenerator::new(true).generate(&playlist);
        assert!(text.contains("#EXTINF:-1 tvg-chno=\"1\",A\n"));
        assert!(text.contains("#EXTINF:-1 tvg-chno=\"2\",B\n"));
    }

    #[test]
    fn test_comma_in_name_survives_reparse() {
        let playlist = MergedPlaylist::new(
            Attributes::new(),
            vec![
                channel("news", "News, HD", &[("http://a/news", LivenessStatus::Alive)]),
                channel("ab", "A,B\nC", &[("http://a/ab", LivenessStatus::Alive)]),
            ],
        );

        let text = PlaylistGenerator::default().generate(&playlist);
        let parsed = M3uParser::new("merged", &text).parse();

        let names: Vec<&str> = parsed.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["News HD", "A B C"]);
        assert_eq!(parsed.entries[0].url, "http://a/news");
    }

    #[tokio::test]
    async fn test_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("merged.m3u");

        let generator = PlaylistGenerator::default();
        let saved = generator.save(&path, "#EXTM3U\n").await.unwrap();

        assert_eq!(saved, path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "#EXTM3U\n");
        assert!(!path.with_extension("m3u.tmp").exists());
    }
}
