// SPDX-License-Identifier: Apache-2.0

//! Record splitting.
//!
//! A [`Splitter`] turns the raw bytes of a file into records. The boundary policy is a
//! [`SplitMode`] chosen once when the configuration is built:
//! - `LineDelimited`: every line is a record
//! - `StartPattern`: a record starts at each line matching the pattern
//! - `EndPattern`: a record ends at each line matching the pattern
//!
//! Splitting works on raw bytes so that the returned `advance` is an exact byte count
//! for offset tracking. Only complete records are returned unless the caller forces a
//! flush (see [`Flusher`]).

mod flusher;

pub use flusher::Flusher;

use regex::Regex;
use serde::Deserialize;

use crate::encoding::Encoding;
use crate::error::{Error, Result};

/// Multi-line boundary configuration. At most one pattern may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MultilineConfig {
    /// Regex matching the first line of a record
    pub line_start_pattern: Option<String>,
    /// Regex matching the last line of a record
    pub line_end_pattern: Option<String>,
}

impl MultilineConfig {
    /// Validate the patterns and compile the split mode.
    pub fn build(&self) -> Result<SplitMode> {
        let start = self.line_start_pattern.as_deref().filter(|p| !p.is_empty());
        let end = self.line_end_pattern.as_deref().filter(|p| !p.is_empty());

        match (start, end) {
            (Some(_), Some(_)) => Err(Error::AmbiguousMultiline),
            (Some(pattern), None) => {
                compile("line_start_pattern", pattern).map(SplitMode::StartPattern)
            }
            (None, Some(pattern)) => {
                compile("line_end_pattern", pattern).map(SplitMode::EndPattern)
            }
            (None, None) => Ok(SplitMode::LineDelimited),
        }
    }
}

fn compile(field: &'static str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| Error::Regex {
        field,
        pattern: pattern.to_string(),
        source,
    })
}

/// How record boundaries are recognized
#[derive(Debug, Clone, Default)]
pub enum SplitMode {
    #[default]
    LineDelimited,
    StartPattern(Regex),
    EndPattern(Regex),
}

/// A complete record found by the splitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Number of raw bytes consumed, including line endings
    pub advance: usize,
    /// The record decoded to UTF-8, without its trailing line ending
    pub record: Vec<u8>,
    /// Set when the record was cut at the maximum log size
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct Splitter {
    mode: SplitMode,
    encoding: Encoding,
    max_log_size: usize,
}

impl Splitter {
    pub fn new(mode: SplitMode, encoding: Encoding, max_log_size: usize) -> Self {
        let max_log_size = encoding.align(max_log_size).max(encoding.unit_width());
        Self {
            mode,
            encoding,
            max_log_size,
        }
    }

    pub fn mode(&self) -> &SplitMode {
        &self.mode
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn max_log_size(&self) -> usize {
        self.max_log_size
    }

    /// Find the next record at the start of `data`.
    ///
    /// `data` must begin at a record boundary. Returns `None` when more data is needed.
    /// With `force` set, whatever is pending is returned as a record even without a
    /// closing boundary.
    pub fn split(&self, data: &[u8], force: bool) -> Option<Token> {
        if data.is_empty() {
            return None;
        }

        if let Some((end, advance)) = self.find_boundary(data) {
            let content = self.encoding.trim_line_ending(&data[..end]);
            if content.len() > self.max_log_size {
                return Some(self.truncated(data));
            }
            return Some(self.token(content, advance));
        }

        if data.len() > self.max_log_size {
            return Some(self.truncated(data));
        }

        if force {
            let content = self.encoding.trim_line_ending(data);
            return Some(self.token(content, data.len()));
        }

        None
    }

    fn token(&self, content: &[u8], advance: usize) -> Token {
        Token {
            advance,
            record: self.encoding.decode(content).into_owned(),
            truncated: false,
        }
    }

    fn truncated(&self, data: &[u8]) -> Token {
        let end = self.max_log_size;
        Token {
            advance: end,
            record: self.encoding.decode(&data[..end]).into_owned(),
            truncated: true,
        }
    }

    /// Locate the end of the first record. Returns the end of its content and the end
    /// of the bytes it consumes. Scanning stops once the record would exceed the
    /// maximum log size.
    fn find_boundary(&self, data: &[u8]) -> Option<(usize, usize)> {
        match &self.mode {
            SplitMode::LineDelimited => self.encoding.find_newline(data),
            SplitMode::StartPattern(re) => {
                // The first line always belongs to the current record
                let (_, mut pos) = self.encoding.find_newline(data)?;
                while pos <= self.max_log_size {
                    let (line_end, next) = self.encoding.find_newline(&data[pos..])?;
                    if self.line_matches(re, &data[pos..pos + line_end]) {
                        return Some((pos, pos));
                    }
                    pos += next;
                }
                None
            }
            SplitMode::EndPattern(re) => {
                let mut pos = 0;
                while pos <= self.max_log_size {
                    let (line_end, next) = self.encoding.find_newline(&data[pos..])?;
                    if self.line_matches(re, &data[pos..pos + line_end]) {
                        return Some((pos + line_end, pos + next));
                    }
                    pos += next;
                }
                None
            }
        }
    }

    fn line_matches(&self, re: &Regex, line: &[u8]) -> bool {
        let line = self.encoding.trim_line_ending(line);
        let decoded = self.encoding.decode(line);
        re.is_match(&String::from_utf8_lossy(&decoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multiline(start: Option<&str>, end: Option<&str>) -> MultilineConfig {
        MultilineConfig {
            line_start_pattern: start.map(String::from),
            line_end_pattern: end.map(String::from),
        }
    }

    fn splitter(mode: SplitMode) -> Splitter {
        Splitter::new(mode, Encoding::default(), 1024)
    }

    /// Split everything available without forcing, returning records and bytes consumed
    fn split_all(splitter: &Splitter, data: &[u8]) -> (Vec<String>, usize) {
        let mut records = Vec::new();
        let mut pos = 0;
        while let Some(token) = splitter.split(&data[pos..], false) {
            records.push(String::from_utf8(token.record).unwrap());
            pos += token.advance;
        }
        (records, pos)
    }

    #[test]
    fn test_build_modes() {
        assert!(matches!(
            multiline(None, None).build().unwrap(),
            SplitMode::LineDelimited
        ));
        assert!(matches!(
            multiline(Some("START.*"), None).build().unwrap(),
            SplitMode::StartPattern(_)
        ));
        assert!(matches!(
            multiline(None, Some("END.*")).build().unwrap(),
            SplitMode::EndPattern(_)
        ));
        // Empty strings count as unset
        assert!(matches!(
            multiline(Some(""), Some("")).build().unwrap(),
            SplitMode::LineDelimited
        ));
    }

    #[test]
    fn test_build_rejects_both_patterns() {
        let err = multiline(Some(".*"), Some(".*")).build().unwrap_err();
        assert!(matches!(err, Error::AmbiguousMultiline));
    }

    #[test]
    fn test_build_rejects_invalid_regex() {
        let err = multiline(Some("("), None).build().unwrap_err();
        assert!(matches!(err, Error::Regex { field: "line_start_pattern", .. }));

        let err = multiline(None, Some("(")).build().unwrap_err();
        assert!(matches!(err, Error::Regex { field: "line_end_pattern", .. }));
    }

    #[test]
    fn test_line_delimited() {
        let s = splitter(SplitMode::LineDelimited);
        let (records, consumed) = split_all(&s, b"one\r\ntwo\nthree");
        assert_eq!(records, vec!["one", "two"]);
        assert_eq!(consumed, 9);

        let token = s.split(b"three", true).unwrap();
        assert_eq!(token.record, b"three");
        assert_eq!(token.advance, 5);
    }

    #[test]
    fn test_start_pattern() {
        let s = splitter(multiline(Some("START.*"), None).build().unwrap());
        let data = b"START a\nb\nSTART c\n";

        let (records, consumed) = split_all(&s, data);
        assert_eq!(records, vec!["START a\nb"]);
        assert_eq!(consumed, 10);

        // The last record has no closing boundary until it is forced out
        let token = s.split(&data[consumed..], true).unwrap();
        assert_eq!(token.record, b"START c");
        assert_eq!(consumed + token.advance, data.len());
    }

    #[test]
    fn test_start_pattern_preamble_is_its_own_record() {
        let s = splitter(multiline(Some("^START"), None).build().unwrap());
        let (records, _) = split_all(&s, b"junk\nmore junk\nSTART a\nSTART b\n");
        assert_eq!(records, vec!["junk\nmore junk", "START a"]);
    }

    #[test]
    fn test_end_pattern() {
        let s = splitter(multiline(None, Some("END$")).build().unwrap());
        let (records, consumed) = split_all(&s, b"a\nb END\nc\nd END\ne\n");
        assert_eq!(records, vec!["a\nb END", "c\nd END"]);
        assert_eq!(consumed, 16);
    }

    #[test]
    fn test_incomplete_line_needs_more() {
        let s = splitter(SplitMode::LineDelimited);
        assert_eq!(s.split(b"partial", false), None);
        assert_eq!(s.split(b"", true), None);
    }

    #[test]
    fn test_oversized_line_is_truncated() {
        let s = Splitter::new(SplitMode::LineDelimited, Encoding::default(), 4);

        let token = s.split(b"abcdefgh\n", false).unwrap();
        assert!(token.truncated);
        assert_eq!(token.record, b"abcd");
        assert_eq!(token.advance, 4);

        let token = s.split(b"efgh\n", false).unwrap();
        assert!(!token.truncated);
        assert_eq!(token.record, b"efgh");
    }

    #[test]
    fn test_oversized_pending_data_is_truncated_without_newline() {
        let s = Splitter::new(SplitMode::LineDelimited, Encoding::default(), 4);
        let token = s.split(b"abcdef", false).unwrap();
        assert!(token.truncated);
        assert_eq!(token.record, b"abcd");
    }

    #[test]
    fn test_oversized_multiline_record_is_truncated() {
        let mode = multiline(Some("^START"), None).build().unwrap();
        let s = Splitter::new(mode, Encoding::default(), 10);
        let token = s.split(b"START a\nb\nc\nd\ne\nSTART b\n", false).unwrap();
        assert!(token.truncated);
        assert_eq!(token.record, b"START a\nb\n");
        assert_eq!(token.advance, 10);
    }

    #[test]
    fn test_utf16le_lines() {
        let enc = Encoding::lookup("utf-16le").unwrap();
        let s = Splitter::new(SplitMode::LineDelimited, enc, 1024);
        let data: Vec<u8> = "héllo\nwörld\n"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();

        let (records, consumed) = split_all(&s, &data);
        assert_eq!(records, vec!["héllo", "wörld"]);
        assert_eq!(consumed, data.len());
    }
}
