//! Line-level HLS manifest model.
//!
//! Only what is needed to relocate references is understood: every line is
//! either passed through or has exactly one URI substituted. Tags are not
//! validated and media bytes are never touched.

use std::ops::Range;

use crate::error::{RelayError, Result};
use crate::url_resolver::{self, resolve};

const KEY_TAG: &str = "#EXT-X-KEY";
const MAP_TAG: &str = "#EXT-X-MAP";
const URI_ATTR: &str = "URI=\"";

/// What a rewritten reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriKind {
    /// A plain URI line: media segment or nested playlist.
    Segment,
    /// `URI="..."` inside `#EXT-X-KEY`.
    Key,
    /// `URI="..."` inside `#EXT-X-MAP`.
    Map,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLine {
    Blank(String),
    Directive(String),
    Segment {
        raw: String,
        url: String,
        index: usize,
    },
    KeyOrMap {
        raw: String,
        kind: UriKind,
        /// Byte range of the attribute value inside `raw`, quotes excluded.
        value: Range<usize>,
        url: String,
    },
}

/// A single reference handed to [`ManifestDocument::rewrite`].
#[derive(Debug, Clone, Copy)]
pub struct RewriteContext<'a> {
    pub kind: UriKind,
    /// Absolute URL after resolution against the manifest base.
    pub url: &'a str,
    /// The reference exactly as written in the manifest.
    pub raw: &'a str,
    /// Ordinal among URI lines; `None` for key/map attributes.
    pub index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ManifestDocument {
    base_url: String,
    lines: Vec<ManifestLine>,
}

impl ManifestDocument {
    /// Classifies `text` line by line, resolving references against `base_url`.
    pub fn parse(text: &str, base_url: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(RelayError::manifest("empty manifest"));
        }

        let mut next_index = 0;
        let lines = text
            .split('\n')
            .map(|line| {
                let line = line.strip_suffix('\r').unwrap_or(line);
                classify(line, base_url, &mut next_index)
            })
            .collect();

        Ok(Self {
            base_url: base_url.to_string(),
            lines,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn lines(&self) -> &[ManifestLine] {
        &self.lines
    }

    /// Resolved URLs of every URI line, in manifest order.
    pub fn uri_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            ManifestLine::Segment { url, .. } => Some(url.as_str()),
            _ => None,
        })
    }

    pub fn segment_count(&self) -> usize {
        self.uri_lines().count()
    }

    /// The first URI line, when it names another playlist.
    pub fn variant_url(&self) -> Option<&str> {
        self.uri_lines()
            .next()
            .filter(|url| url_resolver::is_playlist_url(url))
    }

    /// Re-emits the document with every reference replaced by `target(ctx)`.
    ///
    /// Lines are joined with `\n`; a trailing newline in the input is kept.
    pub fn rewrite<F>(&self, mut target: F) -> String
    where
        F: FnMut(RewriteContext<'_>) -> String,
    {
        let rewritten: Vec<String> = self
            .lines
            .iter()
            .map(|line| match line {
                ManifestLine::Blank(raw) | ManifestLine::Directive(raw) => raw.clone(),
                ManifestLine::Segment { raw, url, index } => target(RewriteContext {
                    kind: UriKind::Segment,
                    url,
                    raw: raw.trim(),
                    index: Some(*index),
                }),
                ManifestLine::KeyOrMap {
                    raw,
                    kind,
                    value,
                    url,
                } => {
                    let replacement = target(RewriteContext {
                        kind: *kind,
                        url,
                        raw: &raw[value.clone()],
                        index: None,
                    });
                    format!("{}{}{}", &raw[..value.start], replacement, &raw[value.end..])
                }
            })
            .collect();
        rewritten.join("\n")
    }
}

fn classify(line: &str, base_url: &str, next_index: &mut usize) -> ManifestLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ManifestLine::Blank(line.to_string());
    }

    if trimmed.starts_with('#') {
        let kind = if trimmed.starts_with(KEY_TAG) {
            Some(UriKind::Key)
        } else if trimmed.starts_with(MAP_TAG) {
            Some(UriKind::Map)
        } else {
            None
        };

        return match kind.zip(find_uri_attribute(line)) {
            Some((kind, value)) => {
                let url = resolve(base_url, &line[value.clone()]);
                ManifestLine::KeyOrMap {
                    raw: line.to_string(),
                    kind,
                    value,
                    url,
                }
            }
            None => ManifestLine::Directive(line.to_string()),
        };
    }

    let index = *next_index;
    *next_index += 1;
    ManifestLine::Segment {
        raw: line.to_string(),
        url: resolve(base_url, trimmed),
        index,
    }
}

/// Locates the quoted value of a `URI=` attribute.
///
/// Only matches at an attribute boundary so names such as `KEYURI=` are skipped.
fn find_uri_attribute(line: &str) -> Option<Range<usize>> {
    let mut from = 0;
    while let Some(offset) = line[from..].find(URI_ATTR) {
        let at = from + offset;
        let boundary = line[..at]
            .chars()
            .next_back()
            .is_some_and(|c| c == ':' || c == ',' || c.is_whitespace());
        let start = at + URI_ATTR.len();
        if boundary {
            let len = line[start..].find('"')?;
            return Some(start..start + len);
        }
        from = start;
    }
    None
}
