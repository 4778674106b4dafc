//! Extended-M3U parsing
//!
//! A `#EXTINF` line announces an entry; the next non-comment, non-blank line
//! is its play-URL. Entries that never receive a URL are reported as
//! [`SourceError::MalformedEntry`] and parsing carries on.

use regex::Regex;
use std::iter::Enumerate;
use std::str::Lines;
use std::sync::LazyLock;
use tracing::{debug, trace};

use crate::errors::{SourceError, SourceResult};
use crate::models::{ATTR_GROUP_TITLE, ATTR_TVG_NAME, Attributes, LIVE_DURATION, RawChannelEntry};

const EXTM3U: &str = "#EXTM3U";
const EXTINF: &str = "#EXTINF";
const EXTGRP: &str = "#EXTGRP:";

static ATTRIBUTE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z0-9_-]+)="([^"]*)""#).expect("attribute regex is valid")
});

/// Parser over one source's raw text.
///
/// Cheap to construct; every call to [`M3uParser::entries`] restarts from the
/// top of the text and yields the same sequence.
#[derive(Debug, Clone, Copy)]
pub struct M3uParser<'a> {
    origin: &'a str,
    content: &'a str,
}

/// Eagerly collected result of parsing a whole source
#[derive(Debug, Clone, Default)]
pub struct ParsedPlaylist {
    pub header: Attributes,
    pub entries: Vec<RawChannelEntry>,
    pub malformed: Vec<SourceError>,
}

impl ParsedPlaylist {
    pub fn skipped(&self) -> usize {
        self.malformed.len()
    }
}

impl<'a> M3uParser<'a> {
    pub fn new(origin: &'a str, content: &'a str) -> Self {
        Self { origin, content }
    }

    /// Lazily yield entries in file order
    pub fn entries(&self) -> M3uEntries<'a> {
        M3uEntries {
            origin: self.origin,
            lines: self.content.lines().enumerate(),
            pending: None,
        }
    }

    /// Attributes of the `#EXTM3U` header line, e.g. `url-tvg`
    pub fn header(&self) -> Attributes {
        let first_line = self
            .content
            .lines()
            .map(|line| line.trim_start_matches('\u{feff}').trim())
            .find(|line| !line.is_empty());

        match first_line {
            Some(line) if line.starts_with(EXTM3U) => parse_attributes(&line[EXTM3U.len()..]),
            _ => Attributes::new(),
        }
    }

    pub fn parse(&self) -> ParsedPlaylist {
        let mut parsed = ParsedPlaylist {
            header: self.header(),
            ..Default::default()
        };

        for item in self.entries() {
            match item {
                Ok(entry) => parsed.entries.push(entry),
                Err(err) => parsed.malformed.push(err),
            }
        }

        debug!(
            "Parsed {} entries from '{}' ({} malformed)",
            parsed.entries.len(),
            self.origin,
            parsed.skipped()
        );
        parsed
    }
}

/// Iterator returned by [`M3uParser::entries`]
pub struct M3uEntries<'a> {
    origin: &'a str,
    lines: Enumerate<Lines<'a>>,
    pending: Option<PendingEntry>,
}

impl Iterator for M3uEntries<'_> {
    type Item = SourceResult<RawChannelEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some((index, raw_line)) = self.lines.next() else {
                return self
                    .pending
                    .take()
                    .map(|pending| Err(pending.malformed("no play-URL before end of input")));
            };

            let line_number = index + 1;
            let line = raw_line.trim_start_matches('\u{feff}').trim();

            if line.is_empty() {
                continue;
            }

            if line.starts_with(EXTINF) {
                let previous = self
                    .pending
                    .replace(PendingEntry::parse(line, line_number));
                if let Some(previous) = previous {
                    return Some(Err(previous.malformed("no play-URL before next #EXTINF")));
                }
                continue;
            }

            if let Some(group) = line.strip_prefix(EXTGRP) {
                if let Some(pending) = self.pending.as_mut() {
                    pending.fill_group(group.trim());
                }
                continue;
            }

            if line.starts_with('#') {
                continue;
            }

            match self.pending.take() {
                Some(pending) => return Some(pending.complete(line, self.origin)),
                None => trace!(
                    "Ignoring play-URL without metadata at line {} of '{}'",
                    line_number, self.origin
                ),
            }
        }
    }
}

#[derive(Debug)]
struct PendingEntry {
    line: usize,
    duration: String,
    title: String,
    attributes: Attributes,
}

impl PendingEntry {
    fn parse(line: &str, line_number: usize) -> Self {
        let body = &line[EXTINF.len()..];
        let body = body.strip_prefix(':').unwrap_or(body);
        let (head, title) = split_title(body);

        let duration = head
            .split(|c: char| c.is_whitespace() || c == ',')
            .next()
            .filter(|token| !token.is_empty() && !token.contains('='))
            .unwrap_or(LIVE_DURATION)
            .to_string();

        Self {
            line: line_number,
            duration,
            title: title.unwrap_or_default().trim().to_string(),
            attributes: parse_attributes(head),
        }
    }

    fn fill_group(&mut self, group: &str) {
        if group.is_empty() {
            return;
        }
        let slot = self
            .attributes
            .entry(ATTR_GROUP_TITLE.to_string())
            .or_default();
        if slot.is_empty() {
            *slot = group.to_string();
        }
    }

    fn malformed(&self, reason: &str) -> SourceError {
        SourceError::malformed(self.line, reason)
    }

    fn complete(self, url: &str, origin: &str) -> SourceResult<RawChannelEntry> {
        let name = if self.title.is_empty() {
            self.attributes
                .get(ATTR_TVG_NAME)
                .map(|name| name.trim().to_string())
                .unwrap_or_default()
        } else {
            self.title.clone()
        };

        if name.is_empty() {
            return Err(self.malformed("missing display name"));
        }

        Ok(RawChannelEntry {
            name,
            url: url.to_string(),
            duration: self.duration,
            attributes: self.attributes,
            origin: origin.to_string(),
            line: self.line,
        })
    }
}

/// Split a metadata body at the last comma outside quoted attribute values.
///
/// Only a quote directly after `=` opens a value, so stray quotes in the
/// display name never hide its commas.
fn split_title(body: &str) -> (&str, Option<&str>) {
    let mut in_value = false;
    let mut previous = None;
    let mut split = None;

    for (index, ch) in body.char_indices() {
        match ch {
            '"' if in_value => in_value = false,
            '"' if previous == Some('=') => in_value = true,
            ',' if !in_value => split = Some(index),
            _ => {}
        }
        previous = Some(ch);
    }

    match split {
        Some(index) => (&body[..index], Some(&body[index + 1..])),
        None => (body, None),
    }
}

/// Extract `key="value"` pairs; the first occurrence of a key wins
pub fn parse_attributes(text: &str) -> Attributes {
    let mut attributes = Attributes::new();
    for captures in ATTRIBUTE_REGEX.captures_iter(text) {
        attributes
            .entry(captures[1].to_ascii_lowercase())
            .or_insert_with(|| captures[2].trim().to_string());
    }
    attributes
}
