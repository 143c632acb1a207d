use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ZafferanoResult;

/// What a capture key maps to: either a bare scope name or an object with a `name`
///
/// # Examples
/// ```json
/// {
///   "1": "keyword.control.import.saffron",
///   "path": { "name": "string.unquoted.path.saffron" }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCapture {
    Scope(String),
    Rule {
        #[serde(default)]
        name: Option<String>,
    },
}

impl RawCapture {
    pub fn scope_name(&self) -> Option<&str> {
        match self {
            RawCapture::Scope(s) => Some(s),
            RawCapture::Rule { name } => name.as_deref(),
        }
    }
}

/// Capture key (group number like `"1"` or group name) -> scope
pub type RawCaptures = BTreeMap<String, RawCapture>;

/// `applyEndPatternLast` is `1` in most grammars but some use `true`
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum BoolOrInt {
    Bool(bool),
    Int(i64),
}

impl BoolOrInt {
    pub fn is_true(self) -> bool {
        match self {
            BoolOrInt::Bool(b) => b,
            BoolOrInt::Int(i) => i != 0,
        }
    }
}

/// A single rule object as found in a grammar document.
///
/// Which kind of rule it is depends on which fields are present:
/// - `include`: a reference to a collection
/// - `match`: a match rule
/// - `begin` + `end`: a region
/// - only `patterns`: a container, its patterns are inlined where it appears
///
/// # Examples
/// ```json
/// {
///   "name": "string.quoted.double.saffron",
///   "begin": "\"",
///   "end": "\"",
///   "patterns": [
///     { "name": "constant.character.escape.saffron", "match": "\\\\." }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawRule {
    /// Scope name for the whole match or region
    pub name: Option<String>,
    /// Scope name for what is between `begin` and `end`, not applied to the delimiters
    pub content_name: Option<String>,
    #[serde(rename(deserialize = "match"))]
    pub match_: Option<String>,
    pub begin: Option<String>,
    /// Can reference begin captures with `\1`..`\9`
    pub end: Option<String>,
    /// Applies to `match`, and to both `begin` and `end` if they don't have their own
    pub captures: RawCaptures,
    pub begin_captures: RawCaptures,
    pub end_captures: RawCaptures,
    /// - "#name" - collection from the repository
    /// - "$self" / "$base" - the root patterns
    /// - the grammar `scopeName` - the root patterns as well
    pub include: Option<String>,
    pub patterns: Vec<RawRule>,
    /// By default the end pattern wins when it matches at the same position as a child rule.
    /// Setting this lets the child rules win instead.
    pub apply_end_pattern_last: Option<BoolOrInt>,
}

impl RawRule {
    /// A rule that only groups other rules
    pub fn is_container(&self) -> bool {
        self.match_.is_none() && self.begin.is_none() && self.end.is_none() && self.include.is_none()
    }
}

/// Different ways to define a named collection in the repository
///
/// # Examples
/// ```json
/// {
///   "repository": {
///     "operators": [
///       { "match": "\\|>", "name": "keyword.operator.pipeline.saffron" }
///     ],
///     "keywords": {
///       "patterns": [
///         { "match": "\\b(if|else|loop)\\b", "name": "keyword.control.saffron" }
///       ]
///     },
///     "strings": {
///       "name": "string.quoted.double.saffron",
///       "begin": "\"",
///       "end": "\""
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawRepositoryEntry {
    /// Direct array of rules
    List(Vec<RawRule>),
    /// A single rule, or a container when it only has `patterns`
    Rule(RawRule),
}

impl RawRepositoryEntry {
    /// The rules making up this collection, in declaration order
    pub fn into_rules(self) -> Vec<RawRule> {
        match self {
            RawRepositoryEntry::List(rules) => rules,
            RawRepositoryEntry::Rule(rule) if rule.is_container() => rule.patterns,
            RawRepositoryEntry::Rule(rule) => vec![rule],
        }
    }
}

/// Top-level structure of a grammar document
///
/// # Examples
/// ```json
/// {
///   "name": "Saffron",
///   "scopeName": "source.saffron",
///   "patterns": [
///     { "include": "#keywords" },
///     { "include": "#strings" }
///   ],
///   "repository": {
///     "keywords": { "patterns": [] },
///     "strings": { "begin": "\"", "end": "\"" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    /// Human-readable name of the language
    #[serde(default)]
    pub name: String,
    /// Scope given to the whole document, eg `source.saffron`
    pub scope_name: String,
    /// Root rules, active at the top level of the document
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    /// Named collections that can be included with `#name`
    #[serde(default)]
    pub repository: HashMap<String, RawRepositoryEntry>,
}

impl RawGrammar {
    pub fn from_json_str(s: &str) -> ZafferanoResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_yaml_str(s: &str) -> ZafferanoResult<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Reads a grammar file, as YAML if the extension is `yaml`/`yml` and as JSON otherwise
    pub fn load_from_file(path: impl AsRef<Path>) -> ZafferanoResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }
}
