use std::fmt;
use std::sync::Arc;

use onig::{Region, RegexOptions, SearchOptions, Syntax};
use serde::{Deserialize, Serialize};

/// Result of a successful search, all positions are byte offsets in the searched text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexMatch {
    pub start: usize,
    pub end: usize,
    /// Spans of every group, index 0 being the whole match.
    /// `None` for groups that did not participate in the match.
    pub captures: Vec<Option<(usize, usize)>>,
}

/// A compiled Oniguruma pattern that serializes as its source string
#[derive(Clone)]
pub struct Regex {
    pattern: String,
    compiled: Arc<onig::Regex>,
    has_anchors: bool,
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for Regex {}

impl Regex {
    pub fn new(pattern: impl Into<String>) -> Result<Self, onig::Error> {
        let pattern = pattern.into();
        // Plain groups should still capture when the pattern also has named groups
        let compiled = onig::Regex::with_options(
            &pattern,
            RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
            Syntax::default(),
        )?;
        let has_anchors = pattern.contains("\\A") || pattern.contains("\\G");

        Ok(Self {
            pattern,
            compiled: Arc::new(compiled),
            has_anchors,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern uses `\A` or `\G`, which are only active in some contexts
    pub fn has_anchors(&self) -> bool {
        self.has_anchors
    }

    /// Number of the group with the given name, if the pattern defines it
    pub fn group_index(&self, name: &str) -> Option<usize> {
        let mut found = None;
        self.compiled.foreach_name(|group_name, indices| {
            if group_name == name {
                found = indices.first().map(|i| *i as usize);
                return false;
            }
            true
        });
        found
    }

    /// Finds the leftmost match starting at or after `from`.
    ///
    /// The whole text is given to the engine rather than a slice so lookbehinds
    /// can see what is before `from`.
    pub fn find_at(&self, text: &str, from: usize) -> Option<RegexMatch> {
        if from > text.len() {
            return None;
        }
        let mut region = Region::new();
        self.compiled.search_with_options(
            text,
            from,
            text.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;
        let (start, end) = region.pos(0)?;
        let captures = (0..region.len()).map(|i| region.pos(i)).collect();

        Some(RegexMatch {
            start,
            end,
            captures,
        })
    }
}

/// Whether the pattern refers to groups with `\1`..`\9`.
/// In end patterns they refer to the begin captures, so such patterns can't be compiled
/// until the region opens.
pub fn has_backreferences(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes[i + 1].is_ascii_digit() && bytes[i + 1] != b'0' {
                return true;
            }
            // skip the escaped char so `\\1` isn't seen as a backref
            i += 2;
            continue;
        }
        i += 1;
    }
    false
}

fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '-' | '{' | '}' | '*' | '+' | '?' | '|' | '^' | '$' | '.' | ',' | '[' | ']'
                | '(' | ')' | '#'
        ) || c.is_whitespace()
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Replaces `\1`..`\9` in `pattern` with the text the begin pattern captured in `line`,
/// escaped so it matches literally. Groups that did not participate become empty.
pub fn resolve_backreferences(
    pattern: &str,
    line: &str,
    captures: &[Option<(usize, usize)>],
) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(d @ '1'..='9') => {
                chars.next();
                let index = d as usize - '0' as usize;
                if let Some(Some((start, end))) = captures.get(index)
                    && let Some(text) = line.get(*start..*end)
                {
                    out.push_str(&escape_literal(text));
                }
            }
            Some(other) => {
                chars.next();
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

impl Serialize for Regex {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for Regex {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let pattern = String::deserialize(deserializer)?;
        Regex::new(pattern).map_err(serde::de::Error::custom)
    }
}
