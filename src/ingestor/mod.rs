//! Turning raw source text into channel entries

pub mod m3u_parser;

pub use m3u_parser::{M3uEntries, M3uParser, ParsedPlaylist, parse_attributes};
