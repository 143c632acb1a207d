use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ZafferanoResult};
use crate::grammars::raw::{RawCaptures, RawGrammar, RawRule};
use crate::grammars::regex::{Regex, has_backreferences, resolve_backreferences};
use crate::registry::{Registry, checked_id};
use crate::scope::{Scope, ScopeInterner};
use crate::tokenizer::{Token, Tokenizer};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u16);

impl RuleId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegexId(u16);

impl RegexId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(pub u16);

impl CollectionId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// End patterns referring to begin captures are only known once the region opens.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum EndPattern {
    Fixed(RegexId),
    Backrefs(String),
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct MatchRule {
    pub id: RuleId,
    /// Where the rule was defined in the grammar document, for diagnostics
    pub origin: String,
    pub scope: Option<Scope>,
    pub regex: RegexId,
    /// Indexed by group number
    pub captures: Vec<Option<Scope>>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct BeginEndRule {
    pub id: RuleId,
    pub origin: String,
    pub scope: Option<Scope>,
    pub content_scope: Option<Scope>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<Scope>>,
    pub end: EndPattern,
    pub end_captures: Vec<Option<Scope>>,
    pub apply_end_pattern_last: bool,
    /// Rules active while the region is open
    pub patterns: CollectionId,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct IncludeRule {
    pub id: RuleId,
    pub origin: String,
    /// The reference as written in the grammar
    pub include: String,
    pub target: CollectionId,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Rule {
    Match(MatchRule),
    BeginEnd(BeginEndRule),
    Include(IncludeRule),
}

impl Rule {
    pub fn id(&self) -> RuleId {
        match self {
            Rule::Match(r) => r.id,
            Rule::BeginEnd(r) => r.id,
            Rule::Include(r) => r.id,
        }
    }

    pub fn origin(&self) -> &str {
        match self {
            Rule::Match(r) => &r.origin,
            Rule::BeginEnd(r) => &r.origin,
            Rule::Include(r) => &r.origin,
        }
    }

    pub fn scope(&self) -> Option<&Scope> {
        match self {
            Rule::Match(r) => r.scope.as_ref(),
            Rule::BeginEnd(r) => r.scope.as_ref(),
            Rule::Include(_) => None,
        }
    }
}

// Arbitrary: backreferences to begin captures can create a new pattern per region opened
const MAX_DYNAMIC_REGEXES: usize = 4096;

/// Patterns created while scanning: end patterns with their backreferences filled in and
/// patterns with disabled anchors. Shared by all the scans of a grammar without locking.
pub(crate) struct DynamicRegexes(papaya::HashMap<String, Arc<Regex>>);

impl Default for DynamicRegexes {
    fn default() -> Self {
        Self(papaya::HashMap::new())
    }
}

impl fmt::Debug for DynamicRegexes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DynamicRegexes({} patterns)", self.0.len())
    }
}

impl DynamicRegexes {
    fn get_or_compile(&self, pattern: &str) -> Result<Arc<Regex>, onig::Error> {
        let map = self.0.pin();
        if let Some(re) = map.get(pattern) {
            return Ok(re.clone());
        }
        let re = Arc::new(Regex::new(pattern)?);
        if map.len() >= MAX_DYNAMIC_REGEXES {
            map.clear();
        }
        Ok(map.get_or_insert(pattern.to_owned(), re).clone())
    }
}

/// A loaded grammar. Immutable once built and safe to share between threads.
#[derive(Debug, Serialize, Deserialize)]
pub struct Grammar {
    pub(crate) name: String,
    pub(crate) scope_name: String,
    pub(crate) scope: Scope,
    pub(crate) regexes: Vec<Regex>,
    pub(crate) registry: Registry,
    #[serde(skip)]
    dynamic_regexes: DynamicRegexes,
}

impl Grammar {
    /// Compiles a raw grammar. Fails on the first invalid pattern or dangling include.
    pub fn from_raw(raw: RawGrammar) -> ZafferanoResult<Self> {
        GrammarCompiler::new(&raw.scope_name).compile(raw)
    }

    pub fn from_json_str(s: &str) -> ZafferanoResult<Self> {
        Self::from_raw(RawGrammar::from_json_str(s)?)
    }

    pub fn from_yaml_str(s: &str) -> ZafferanoResult<Self> {
        Self::from_raw(RawGrammar::from_yaml_str(s)?)
    }

    /// Reads the file and compiles it, see [`RawGrammar::load_from_file`] for the formats
    pub fn load_from_file(path: impl AsRef<Path>) -> ZafferanoResult<Self> {
        Self::from_raw(RawGrammar::load_from_file(path)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    /// The scope applied to the whole document
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        self.registry.rule(id)
    }

    /// Rules of a repository collection, in declaration order
    pub fn resolve(&self, collection_name: &str) -> ZafferanoResult<&[RuleId]> {
        self.registry.resolve(collection_name)
    }

    /// Tokenizes a whole document. Use a [`Tokenizer`] directly to scan line by line.
    pub fn scan(&self, document: &str) -> ZafferanoResult<Vec<Token>> {
        Tokenizer::new(self).scan(document)
    }

    #[inline]
    pub(crate) fn regex(&self, id: RegexId) -> &Regex {
        &self.regexes[id.as_index()]
    }

    pub(crate) fn dynamic_regex(&self, pattern: &str, rule: RuleId) -> ZafferanoResult<Arc<Regex>> {
        self.dynamic_regexes
            .get_or_compile(pattern)
            .map_err(|e| Error::PatternCompile {
                rule: self.rule(rule).origin().to_owned(),
                pattern: pattern.to_owned(),
                message: e.to_string(),
            })
    }

    #[cfg(feature = "dump")]
    /// Serializes the compiled grammar to zstd-compressed bitcode
    pub fn to_dump_bytes(&self) -> ZafferanoResult<Vec<u8>> {
        let data = bitcode::serialize(self)?;
        Ok(zstd::encode_all(data.as_slice(), 0)?)
    }

    #[cfg(feature = "dump")]
    /// Loads a grammar from bytes created by [`Grammar::to_dump_bytes`].
    /// Patterns are compiled again.
    pub fn from_dump_bytes(compressed_data: &[u8]) -> ZafferanoResult<Self> {
        let data = zstd::decode_all(compressed_data)?;
        Ok(bitcode::deserialize(&data)?)
    }

    #[cfg(feature = "dump")]
    /// Dump the compiled grammar to a binary file that can be loaded later
    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> ZafferanoResult<()> {
        std::fs::write(path, self.to_dump_bytes()?)?;
        Ok(())
    }

    #[cfg(feature = "dump")]
    /// Read a binary dump created by [`Grammar::dump_to_file`]
    pub fn load_from_dump(path: impl AsRef<Path>) -> ZafferanoResult<Self> {
        let compressed_data = std::fs::read(path)?;
        Self::from_dump_bytes(&compressed_data)
    }
}

fn describe(origin: &str, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("{origin} ({name})"),
        None => origin.to_owned(),
    }
}

struct GrammarCompiler {
    scope_name: String,
    interner: ScopeInterner,
    regexes: Vec<Regex>,
    registry: Registry,
}

impl GrammarCompiler {
    fn new(scope_name: &str) -> Self {
        Self {
            scope_name: scope_name.to_owned(),
            interner: ScopeInterner::default(),
            regexes: Vec::new(),
            registry: Registry::default(),
        }
    }

    fn compile(mut self, raw: RawGrammar) -> ZafferanoResult<Grammar> {
        if raw.scope_name.trim().is_empty() {
            return Err(Error::InvalidRule {
                rule: "scopeName".to_owned(),
                reason: "the grammar scope name is empty".to_owned(),
            });
        }

        // Every name is reserved first so includes can point anywhere, including
        // to the collection currently being compiled.
        // Sorted so rule ids don't depend on the hashmap order.
        let mut repository: Vec<_> = raw.repository.into_iter().collect();
        repository.sort_by(|a, b| a.0.cmp(&b.0));
        let repo_ids: Vec<_> = repository
            .iter()
            .map(|(name, _)| self.registry.reserve_collection(Some(name.clone())))
            .collect::<ZafferanoResult<_>>()?;

        let root_rules = self.compile_rules(raw.patterns, "patterns")?;
        let root = self.registry.root();
        self.registry.set_collection_rules(root, root_rules);

        for ((name, entry), id) in repository.into_iter().zip(repo_ids) {
            let rules = self.compile_rules(entry.into_rules(), &format!("repository.{name}"))?;
            self.registry.set_collection_rules(id, rules);
        }

        #[cfg(feature = "debug")]
        log::debug!(
            "[compile] '{}': {} rules, {} collections, {} regexes",
            self.scope_name,
            self.registry.rules_len(),
            self.registry.collections_len(),
            self.regexes.len()
        );

        let scope = self.interner.intern(&self.scope_name);
        Ok(Grammar {
            name: raw.name,
            scope_name: self.scope_name,
            scope,
            regexes: self.regexes,
            registry: self.registry,
            dynamic_regexes: DynamicRegexes::default(),
        })
    }

    fn compile_rules(&mut self, rules: Vec<RawRule>, origin: &str) -> ZafferanoResult<Vec<RuleId>> {
        let mut out = Vec::with_capacity(rules.len());
        for (i, rule) in rules.into_iter().enumerate() {
            out.push(self.compile_rule(rule, format!("{origin}[{i}]"))?);
        }
        Ok(out)
    }

    fn compile_rule(&mut self, raw: RawRule, origin: String) -> ZafferanoResult<RuleId> {
        let invalid = |reason: &str| Error::InvalidRule {
            rule: describe(&origin, raw.name.as_deref()),
            reason: reason.to_owned(),
        };

        // Like vscode-textmate, other fields are ignored when there's an include
        if let Some(include) = raw.include {
            let target = self.resolve_include(&include, &origin)?;
            return self.registry.push_rule(|id| {
                Rule::Include(IncludeRule {
                    id,
                    origin,
                    include,
                    target,
                })
            });
        }

        let scope = self.intern_name(raw.name.as_deref());

        if let Some(pattern) = &raw.match_ {
            let (regex_id, regex) = self.compile_regex(pattern, &origin, raw.name.as_deref())?;
            let captures = self.compile_captures(&raw.captures, &regex, &origin, true)?;
            return self.registry.push_rule(|id| {
                Rule::Match(MatchRule {
                    id,
                    origin,
                    scope,
                    regex: regex_id,
                    captures,
                })
            });
        }

        match (&raw.begin, &raw.end) {
            (Some(begin), Some(end)) => {
                let name = raw.name.as_deref();
                let (begin_id, begin_re) = self.compile_regex(begin, &origin, name)?;
                let (end, end_re) = if has_backreferences(end) {
                    // Validate with every backreference empty, the real pattern is built
                    // when the region opens
                    let probe = resolve_backreferences(end, "", &[]);
                    let (_, re) = self.compile_regex_unstored(&probe, end, &origin, name)?;
                    (EndPattern::Backrefs(end.clone()), re)
                } else {
                    let (id, re) = self.compile_regex(end, &origin, name)?;
                    (EndPattern::Fixed(id), re)
                };

                let (begin_raw, begin_strict) = if raw.begin_captures.is_empty() {
                    (&raw.captures, false)
                } else {
                    (&raw.begin_captures, true)
                };
                let begin_captures =
                    self.compile_captures(begin_raw, &begin_re, &origin, begin_strict)?;
                let (end_raw, end_strict) = if raw.end_captures.is_empty() {
                    (&raw.captures, false)
                } else {
                    (&raw.end_captures, true)
                };
                let end_captures = self.compile_captures(end_raw, &end_re, &origin, end_strict)?;
                let content_scope = self.intern_name(raw.content_name.as_deref());
                let apply_end_pattern_last = raw
                    .apply_end_pattern_last
                    .is_some_and(|v| v.is_true());

                let patterns = self.registry.reserve_collection(None)?;
                let children = self.compile_rules(raw.patterns, &format!("{origin}.patterns"))?;
                self.registry.set_collection_rules(patterns, children);

                self.registry.push_rule(|id| {
                    Rule::BeginEnd(BeginEndRule {
                        id,
                        origin,
                        scope,
                        content_scope,
                        begin: begin_id,
                        begin_captures,
                        end,
                        end_captures,
                        apply_end_pattern_last,
                        patterns,
                    })
                })
            }
            (Some(_), None) => Err(invalid("`begin` without `end`")),
            (None, Some(_)) => Err(invalid("`end` without `begin`")),
            (None, None) => {
                // A container: its rules become an anonymous collection included in place.
                // Empty ones, like rules only holding a `comment`, never match anything.
                let target = self.registry.reserve_collection(None)?;
                let children = self.compile_rules(raw.patterns, &format!("{origin}.patterns"))?;
                self.registry.set_collection_rules(target, children);
                self.registry.push_rule(|id| {
                    Rule::Include(IncludeRule {
                        id,
                        include: origin.clone(),
                        origin,
                        target,
                    })
                })
            }
        }
    }

    /// Blank names are treated as missing
    fn intern_name(&mut self, name: Option<&str>) -> Option<Scope> {
        name.map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| self.interner.intern(n))
    }

    /// Allowed values:
    ///  * Relative repository reference, e.g. `#strings`
    ///  * self, e.g. `$self` or `$base`
    ///  * The grammar own scope name, e.g. `source.saffron`
    ///  * The grammar own scope name + repository, e.g. `source.saffron#strings`
    fn resolve_include(&self, include: &str, origin: &str) -> ZafferanoResult<CollectionId> {
        let unresolved = || Error::UnresolvedInclude {
            rule: origin.to_owned(),
            include: include.to_owned(),
        };

        match include {
            "$self" | "$base" => Ok(self.registry.root()),
            s if s == self.scope_name => Ok(self.registry.root()),
            s => {
                let (scope, name) = s.split_once('#').ok_or_else(unresolved)?;
                if !scope.is_empty() && scope != self.scope_name {
                    return Err(unresolved());
                }
                self.registry.collection_id(name).ok_or_else(unresolved)
            }
        }
    }

    fn compile_regex(
        &mut self,
        pattern: &str,
        origin: &str,
        name: Option<&str>,
    ) -> ZafferanoResult<(RegexId, Regex)> {
        let (id, re) = self.compile_regex_unstored(pattern, pattern, origin, name)?;
        self.regexes.push(re.clone());
        Ok((id, re))
    }

    /// `source` is the pattern as written in the grammar, reported in errors
    fn compile_regex_unstored(
        &self,
        pattern: &str,
        source: &str,
        origin: &str,
        name: Option<&str>,
    ) -> ZafferanoResult<(RegexId, Regex)> {
        let id = RegexId(checked_id(self.regexes.len(), "patterns")?);
        let re = Regex::new(pattern).map_err(|e| Error::PatternCompile {
            rule: describe(origin, name),
            pattern: source.to_owned(),
            message: e.to_string(),
        })?;
        Ok((id, re))
    }

    /// When `strict` is false, named keys the pattern doesn't define are skipped: this is
    /// used for the shared `captures` of regions which apply to both begin and end patterns.
    fn compile_captures(
        &mut self,
        captures: &RawCaptures,
        regex: &Regex,
        origin: &str,
        strict: bool,
    ) -> ZafferanoResult<Vec<Option<Scope>>> {
        if captures.is_empty() {
            return Ok(Vec::new());
        }

        let mut out: Vec<Option<Scope>> = Vec::new();
        for (key, capture) in captures {
            let index = match key.parse::<usize>() {
                Ok(i) => i,
                Err(_) => match regex.group_index(key) {
                    Some(i) => i,
                    None if strict => {
                        return Err(Error::UnknownCaptureGroup {
                            rule: origin.to_owned(),
                            group: key.clone(),
                        });
                    }
                    None => continue,
                },
            };
            let Some(scope) = self.intern_name(capture.scope_name()) else {
                continue;
            };
            if out.len() <= index {
                out.resize(index + 1, None);
            }
            out[index] = Some(scope);
        }

        Ok(out)
    }
}
