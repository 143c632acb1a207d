//! The scanning logic follows <https://github.com/microsoft/vscode-textmate>, minus
//! injections and `while` rules.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::{Error, ZafferanoResult};
use crate::grammars::{
    BeginEndRule, CollectionId, EndPattern, Grammar, MatchRule, Regex, RegexMatch, Rule, RuleId,
    resolve_backreferences,
};
use crate::scope::Scope;
use crate::tokenizer::anchors::AnchorActive;
use crate::tokenizer::stack::{StackFrame, StateStack};

mod anchors;
mod stack;

pub use stack::StackState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Byte span (start inclusive, end exclusive). Relative to the document for
    /// [`Tokenizer::scan`] and [`Tokenizer::lines`], to the line for [`Tokenizer::scan_line`].
    pub span: Range<usize>,
    /// Hierarchical scope names, ordered from outermost to innermost
    /// (e.g., source.saffron -> string.quoted.double.saffron -> constant.character.escape.saffron).
    pub scopes: Vec<Scope>,
}

impl Token {
    pub fn start(&self) -> usize {
        self.span.start
    }

    pub fn end(&self) -> usize {
        self.span.end
    }
}

/// Small wrapper so we only produce valid tokens.
/// Called in the tokenizer a few times and easier to use a struct than pass
/// mutable vec and usize everywhere
#[derive(Debug, Clone, Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    /// Position up to which tokens have been generated
    /// (start of next token to be produced)
    last_end_pos: usize,
}

impl TokenAccumulator {
    fn produce(&mut self, end_pos: usize, scopes: &[Scope]) {
        // Skip empty tokens (can happen with zero-width matches)
        if self.last_end_pos >= end_pos {
            return;
        }

        #[cfg(feature = "debug")]
        log::debug!(
            "[produce]: [{}..{end_pos}]\n{}",
            self.last_end_pos,
            scopes
                .iter()
                .map(|s| format!(" * {s}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        self.tokens.push(Token {
            span: self.last_end_pos..end_pos,
            scopes: scopes.to_vec(),
        });

        self.last_end_pos = end_pos;
    }
}

/// Emits the tokens of a match with capture scopes nested inside `base`.
/// Groups can nest, eg `((a)b)`, so the scopes of the groups still open are kept in
/// a small local stack.
fn produce_captures(
    acc: &mut TokenAccumulator,
    base: &[Scope],
    capture_scopes: &[Option<Scope>],
    m: &RegexMatch,
) {
    if capture_scopes.is_empty() {
        return;
    }

    // (scopes, end_pos)[]
    let mut local_stack: Vec<(Vec<Scope>, usize)> = Vec::with_capacity(2);

    for (scope, span) in capture_scopes.iter().zip(&m.captures) {
        let (Some(scope), Some((start, end))) = (scope, *span) else {
            continue;
        };
        // Nothing captured, or captured by a lookaround outside of the match
        if start == end || start < m.start || end > m.end {
            continue;
        }

        while let Some((scopes, end_pos)) = local_stack.last()
            && *end_pos <= start
        {
            acc.produce(*end_pos, scopes);
            local_stack.pop();
        }

        let parent = local_stack.last().map_or(base, |(s, _)| s.as_slice());
        acc.produce(start, parent);
        let mut scopes = parent.to_vec();
        scopes.push(scope.clone());
        local_stack.push((scopes, end));
    }

    while let Some((scopes, end_pos)) = local_stack.pop() {
        acc.produce(end_pos, &scopes);
    }
}

/// Where the next character starts, used to get unstuck after an empty match
fn next_char_boundary(line: &str, pos: usize) -> usize {
    pos + line[pos..].chars().next().map_or(1, char::len_utf8)
}

/// What won at the current position
#[derive(Debug, Clone, Copy)]
enum Matched<'g> {
    Match(&'g MatchRule),
    Begin(&'g BeginEndRule),
    /// The end pattern of the region on top of the stack
    End(&'g BeginEndRule),
}

/// Tokens of a single line, see [`Tokenizer::scan_line`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTokens {
    pub tokens: Vec<Token>,
    /// The state to give when scanning the next line
    pub state: StackState,
}

/// A position in a document where scanning can resume
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the next line to scan
    pub line: usize,
    /// Byte offset of that line in the document
    pub offset: usize,
    pub state: StackState,
}

impl Checkpoint {
    /// The start of a document
    pub fn start(grammar: &Grammar) -> Self {
        Self {
            line: 0,
            offset: 0,
            state: StackState::initial(grammar),
        }
    }
}

/// A line yielded by [`Lines`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedLine {
    /// 0-based line number
    pub index: usize,
    /// Where the line is in the document, including its newline
    pub span: Range<usize>,
    /// Tokens with document offsets
    pub tokens: Vec<Token>,
    /// State at the end of the line
    pub state: StackState,
}

impl ScannedLine {
    /// Where to resume to scan the lines after this one
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            line: self.index + 1,
            offset: self.span.end,
            state: self.state.clone(),
        }
    }
}

/// Lazy iterator over the lines of a document.
/// A line is only scanned when asked for. It stops after the first error.
#[derive(Debug)]
pub struct Lines<'t, 'g, 'd> {
    tokenizer: &'t mut Tokenizer<'g>,
    document: &'d str,
    index: usize,
    offset: usize,
    /// `None` once finished or after an error
    state: Option<StackState>,
}

impl Iterator for Lines<'_, '_, '_> {
    type Item = ZafferanoResult<ScannedLine>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.document.get(self.offset..).unwrap_or_default();
        if rest.is_empty() {
            self.state = None;
            return None;
        }
        let state = self.state.take()?;
        // The newline belongs to the line: some end patterns need to see it
        let len = rest.find('\n').map_or(rest.len(), |i| i + 1);
        let span = self.offset..self.offset + len;

        #[cfg(feature = "debug")]
        log::debug!("[lines] scanning line {} at {:?}", self.index, span);

        let (mut tokens, stack) = match self.tokenizer.tokenize_line(&rest[..len], state.0) {
            Ok(res) => res,
            Err(e) => return Some(Err(e)),
        };
        for token in &mut tokens {
            token.span = token.span.start + span.start..token.span.end + span.start;
        }
        let state = StackState(stack);
        let line = ScannedLine {
            index: self.index,
            span,
            tokens,
            state: state.clone(),
        };

        self.index += 1;
        self.offset += len;
        self.state = Some(state);
        Some(Ok(line))
    }
}

/// Scans documents with a grammar.
///
/// Cheap to create. It keeps the rules active in each context it has seen so it's a bit
/// faster to reuse one for many scans.
#[derive(Debug)]
pub struct Tokenizer<'g> {
    grammar: &'g Grammar,
    cancellation: Option<CancellationToken>,
    /// Flattened rules for each collection, computed on first use
    rules_cache: HashMap<CollectionId, Rc<[RuleId]>>,
}

impl<'g> Tokenizer<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Self {
            grammar,
            cancellation: None,
            rules_cache: HashMap::new(),
        }
    }

    /// Scans will return [`Error::Cancelled`] once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn grammar(&self) -> &'g Grammar {
        self.grammar
    }

    /// Tokenizes a whole document. Tokens cover all of it, in order and without gaps.
    pub fn scan(&mut self, document: &str) -> ZafferanoResult<Vec<Token>> {
        let mut tokens = Vec::new();
        for line in self.lines(document) {
            tokens.extend(line?.tokens);
        }
        Ok(tokens)
    }

    /// Tokenizes a single line given the state at the end of the previous one.
    /// `line` should include its newline if it has one.
    ///
    /// Token offsets are relative to the start of the line.
    pub fn scan_line(&mut self, line: &str, state: &StackState) -> ZafferanoResult<LineTokens> {
        state.0.validate(self.grammar)?;
        let (tokens, stack) = self.tokenize_line(line, state.0.clone())?;
        Ok(LineTokens {
            tokens,
            state: StackState(stack),
        })
    }

    /// Iterates over the lines of the document, scanning each one only when needed
    pub fn lines<'t, 'd>(&'t mut self, document: &'d str) -> Lines<'t, 'g, 'd> {
        let state = StackState::initial(self.grammar);
        Lines {
            tokenizer: self,
            document,
            index: 0,
            offset: 0,
            state: Some(state),
        }
    }

    /// Like [`Tokenizer::lines`] but starting from a checkpoint of a previous scan.
    /// Lines before the checkpoint are not scanned again.
    pub fn lines_from<'t, 'd>(
        &'t mut self,
        document: &'d str,
        checkpoint: Checkpoint,
    ) -> ZafferanoResult<Lines<'t, 'g, 'd>> {
        checkpoint.state.0.validate(self.grammar)?;
        if !document.is_char_boundary(checkpoint.offset) {
            return Err(Error::InvalidState(format!(
                "checkpoint offset {} is not a position in the document",
                checkpoint.offset
            )));
        }

        Ok(Lines {
            tokenizer: self,
            document,
            index: checkpoint.line,
            offset: checkpoint.offset,
            state: Some(checkpoint.state),
        })
    }

    fn check_cancelled(&self) -> ZafferanoResult<()> {
        match &self.cancellation {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    fn active_rules(&mut self, collection: CollectionId) -> Rc<[RuleId]> {
        let grammar = self.grammar;
        self.rules_cache
            .entry(collection)
            .or_insert_with(|| grammar.registry().flatten(collection).into())
            .clone()
    }

    /// Searches with `\A` and `\G` disabled unless they can match here
    fn find(
        &self,
        regex: &Regex,
        rule: RuleId,
        line: &str,
        pos: usize,
        anchors: AnchorActive,
    ) -> ZafferanoResult<Option<RegexMatch>> {
        if regex.has_anchors()
            && let Cow::Owned(pattern) = anchors.replace_anchors(regex.pattern())
        {
            return Ok(self.grammar.dynamic_regex(&pattern, rule)?.find_at(line, pos));
        }
        Ok(regex.find_at(line, pos))
    }

    fn find_end(
        &self,
        frame: &StackFrame,
        region: &BeginEndRule,
        line: &str,
        pos: usize,
        anchors: AnchorActive,
    ) -> ZafferanoResult<Option<RegexMatch>> {
        match (&frame.end_pattern, &region.end) {
            (None, EndPattern::Fixed(id)) => {
                self.find(self.grammar.regex(*id), region.id, line, pos, anchors)
            }
            (Some(pattern), _) => {
                let re = self.grammar.dynamic_regex(pattern, region.id)?;
                self.find(&re, region.id, line, pos, anchors)
            }
            // A state built by hand: the groups are unknown
            (None, EndPattern::Backrefs(pattern)) => {
                let pattern = resolve_backreferences(pattern, "", &[]);
                let re = self.grammar.dynamic_regex(&pattern, region.id)?;
                self.find(&re, region.id, line, pos, anchors)
            }
        }
    }

    /// The match starting first wins.
    /// On a tie, the end pattern of the current region wins unless it has
    /// `applyEndPatternLast`, then the rule declared first.
    fn find_best(
        &self,
        stack: &StateStack,
        rules: &[RuleId],
        line: &str,
        pos: usize,
        anchors: AnchorActive,
    ) -> ZafferanoResult<Option<(Matched<'g>, RegexMatch)>> {
        let grammar = self.grammar;
        let region = match stack.top().rule.map(|id| grammar.rule(id)) {
            Some(Rule::BeginEnd(r)) => Some(r),
            _ => None,
        };
        let mut best: Option<(Matched<'g>, RegexMatch)> = None;

        if let Some(region) = region
            && !region.apply_end_pattern_last
            && let Some(m) = self.find_end(stack.top(), region, line, pos, anchors)?
        {
            if m.start == pos {
                return Ok(Some((Matched::End(region), m)));
            }
            best = Some((Matched::End(region), m));
        }

        for &id in rules {
            let (candidate, regex) = match grammar.rule(id) {
                Rule::Match(r) => (Matched::Match(r), grammar.regex(r.regex)),
                Rule::BeginEnd(r) => (Matched::Begin(r), grammar.regex(r.begin)),
                // flattened away
                Rule::Include(_) => continue,
            };
            let Some(m) = self.find(regex, id, line, pos, anchors)? else {
                continue;
            };
            if best.as_ref().is_none_or(|(_, b)| m.start < b.start) {
                let done = m.start == pos;
                best = Some((candidate, m));
                if done {
                    break;
                }
            }
        }

        if let Some(region) = region
            && region.apply_end_pattern_last
            && let Some(m) = self.find_end(stack.top(), region, line, pos, anchors)?
            && best.as_ref().is_none_or(|(_, b)| m.start < b.start)
        {
            best = Some((Matched::End(region), m));
        }

        Ok(best)
    }

    /// Every iteration either advances `pos`, or pushes/pops a frame.
    /// When an empty match would lead to a loop we skip a char instead.
    fn tokenize_line(
        &mut self,
        line: &str,
        mut stack: StateStack,
    ) -> ZafferanoResult<(Vec<Token>, StateStack)> {
        let mut acc = TokenAccumulator::default();
        let mut pos = 0;
        let mut is_first_line = stack.is_first_line();
        if stack.top().begin_captured_eol {
            stack.top_mut().anchor_position = Some(0);
        }

        while pos < line.len() {
            self.check_cancelled()?;
            let rules = self.active_rules(stack.active_collection(self.grammar));
            let anchors = AnchorActive::new(is_first_line, stack.top().anchor_position, pos);

            #[cfg(feature = "debug")]
            log::trace!(
                "[tokenize_line] Scanning {pos}: |{:?}| ({anchors:?})",
                &line[pos..]
            );

            let Some((matched, m)) = self.find_best(&stack, &rules, line, pos, anchors)? else {
                #[cfg(feature = "debug")]
                log::debug!("[tokenize_line] no more matches");
                break;
            };

            #[cfg(feature = "debug")]
            log::debug!(
                "[tokenize_line] Matched {matched:?} from pos {} to {} => {:?}",
                m.start,
                m.end,
                &line[m.start..m.end]
            );

            let has_advanced = m.end > pos;
            acc.produce(m.start, &stack.top().content_scopes);

            let stuck = match matched {
                Matched::Match(rule) => {
                    let mut scopes = stack.top().content_scopes.clone();
                    scopes.extend(rule.scope.clone());
                    produce_captures(&mut acc, &scopes, &rule.captures, &m);
                    acc.produce(m.end, &scopes);
                    !has_advanced
                }
                // Same rule entered at the same place without consuming anything
                Matched::Begin(rule) if !has_advanced && stack.has_entered(rule.id, pos) => true,
                Matched::Begin(rule) => {
                    let mut name_scopes = stack.top().content_scopes.clone();
                    name_scopes.extend(rule.scope.clone());
                    produce_captures(&mut acc, &name_scopes, &rule.begin_captures, &m);
                    acc.produce(m.end, &name_scopes);

                    let mut content_scopes = name_scopes.clone();
                    content_scopes.extend(rule.content_scope.clone());
                    let end_pattern = match &rule.end {
                        EndPattern::Backrefs(pattern) => {
                            Some(resolve_backreferences(pattern, line, &m.captures))
                        }
                        EndPattern::Fixed(_) => None,
                    };

                    stack.push(StackFrame {
                        rule: Some(rule.id),
                        name_scopes,
                        content_scopes,
                        end_pattern,
                        begin_captured_eol: m.end == line.len(),
                        anchor_position: Some(m.end),
                        entered_at: Some(m.start),
                    });
                    false
                }
                Matched::End(rule) => {
                    let Some(frame) = stack.pop() else {
                        break;
                    };
                    produce_captures(&mut acc, &frame.name_scopes, &rule.end_captures, &m);
                    acc.produce(m.end, &frame.name_scopes);

                    #[cfg(feature = "debug")]
                    log::debug!("[tokenize_line] Popped, new stack: {stack:?}");

                    // Closed where it opened without consuming anything
                    !has_advanced && frame.entered_at == Some(pos)
                }
            };

            if has_advanced {
                pos = m.end;
                is_first_line = false;
            } else if stuck {
                let next = next_char_boundary(line, pos);
                #[cfg(feature = "debug")]
                log::debug!("[tokenize_line] Empty match at {pos}, skipping to {next}");
                acc.produce(next, &stack.top().content_scopes);
                pos = next;
                is_first_line = false;
            }
        }

        acc.produce(line.len(), &stack.top().content_scopes);
        stack.finish_line();
        Ok((acc.tokens, stack))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::{
        SAMPLE_PATH, assert_contiguous, format_tokens, saffron_grammar, scopes_of,
    };

    fn compile(json: &str) -> Grammar {
        Grammar::from_json_str(json).unwrap()
    }

    fn sample() -> String {
        std::fs::read_to_string(SAMPLE_PATH).unwrap()
    }

    #[test]
    fn escaped_string_gives_five_tokens() {
        let grammar = saffron_grammar();
        let doc = r#""a\"b""#;
        let tokens = grammar.scan(doc).unwrap();
        assert_contiguous(doc, &tokens);
        assert_eq!(tokens.len(), 5);

        let spans: Vec<_> = tokens.iter().map(|t| &doc[t.span.clone()]).collect();
        assert_eq!(spans, vec!["\"", "a", "\\\"", "b", "\""]);
        for token in &tokens {
            assert!(
                scopes_of(token).contains(&"string.quoted.double.saffron"),
                "{token:?}"
            );
        }
        assert_eq!(
            scopes_of(&tokens[2]),
            vec![
                "source.saffron",
                "string.quoted.double.saffron",
                "constant.character.escape.saffron"
            ]
        );
        assert_eq!(
            scopes_of(&tokens[0]).last(),
            Some(&"punctuation.definition.string.begin.saffron")
        );
    }

    #[test]
    fn line_comment_ends_with_its_line() {
        let grammar = saffron_grammar();
        let mut tokenizer = Tokenizer::new(&grammar);
        let lines: Vec<_> = tokenizer
            .lines("// hi\ncode")
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lines.len(), 2);

        let comment = &lines[0];
        assert_eq!(comment.span, 0..6);
        let texts: Vec<_> = comment.tokens.iter().map(|t| t.span.clone()).collect();
        assert_eq!(texts, vec![0..2, 2..5, 5..6]);
        for token in &comment.tokens {
            assert_eq!(
                scopes_of(token),
                vec!["source.saffron", "comment.line.double-slash.saffron"]
            );
        }
        assert!(comment.state.is_root());

        assert_eq!(lines[1].tokens.len(), 1);
        assert_eq!(lines[1].tokens[0].span, 6..10);
        assert_eq!(scopes_of(&lines[1].tokens[0]), vec!["source.saffron"]);
    }

    #[test]
    fn recursive_include_nests_three_levels() {
        let grammar = saffron_grammar();
        let doc = "A<B<C<D>>>";
        let tokens = grammar.scan(doc).unwrap();
        assert_contiguous(doc, &tokens);
        assert_eq!(tokens.len(), 10);

        let depth = |t: &Token| {
            t.scopes
                .iter()
                .filter(|s| s.as_str() == "meta.generic.saffron")
                .count()
        };
        let depths: Vec<_> = tokens.iter().map(depth).collect();
        assert_eq!(depths, vec![1, 1, 2, 2, 3, 3, 3, 3, 2, 1]);
        assert_eq!(
            scopes_of(&tokens[6]).last(),
            Some(&"entity.name.type.saffron")
        );
        assert_eq!(
            scopes_of(&tokens[9]).last(),
            Some(&"punctuation.definition.generic.end.saffron")
        );
    }

    #[test]
    fn unterminated_region_is_not_an_error() {
        let grammar = saffron_grammar();
        let tokens = grammar.scan("\"").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].span, 0..1);
        assert!(scopes_of(&tokens[0]).contains(&"string.quoted.double.saffron"));

        let doc = "\"\nfunc main() {}\n";
        let tokens = grammar.scan(doc).unwrap();
        assert_contiguous(doc, &tokens);
        for token in &tokens {
            assert!(scopes_of(token).contains(&"string.quoted.double.saffron"));
        }
    }

    #[test]
    fn named_captures_apply_to_delimiters() {
        let grammar = saffron_grammar();
        let doc = "import \"std/io\";\n";
        let tokens = grammar.scan(doc).unwrap();
        insta::assert_snapshot!(format_tokens(doc, &tokens), @r#"
        "import" 0..6 source.saffron meta.import.saffron keyword.control.import.saffron
        " " 6..7 source.saffron meta.import.saffron
        "\"" 7..8 source.saffron meta.import.saffron string.quoted.double.saffron punctuation.definition.string.begin.saffron
        "std/io" 8..14 source.saffron meta.import.saffron string.quoted.double.saffron
        "\"" 14..15 source.saffron meta.import.saffron string.quoted.double.saffron punctuation.definition.string.end.saffron
        ";" 15..16 source.saffron meta.import.saffron punctuation.terminator.statement.saffron
        "\n" 16..17 source.saffron
        "#);
    }

    #[test]
    fn optional_groups_that_did_not_match_are_skipped() {
        let grammar = saffron_grammar();
        let doc = "struct Circle inherit Shape\nstruct Shape\n";
        let tokens = grammar.scan(doc).unwrap();
        assert_contiguous(doc, &tokens);
        let find = |text: &str, from: usize| {
            tokens
                .iter()
                .find(|t| t.start() >= from && &doc[t.span.clone()] == text)
                .unwrap()
        };
        assert_eq!(
            scopes_of(find("inherit", 0)).last(),
            Some(&"storage.modifier.inherit.saffron")
        );
        assert_eq!(
            scopes_of(find("Shape", 0)).last(),
            Some(&"entity.other.inherited-class.saffron")
        );
        assert_eq!(
            scopes_of(find("Shape", 28)).last(),
            Some(&"entity.name.type.struct.saffron")
        );
    }

    #[test]
    fn end_pattern_wins_ties_unless_applied_last() {
        let grammar = |last: bool| {
            compile(&format!(
                r#"{{
                  "scopeName": "source.test",
                  "patterns": [
                    {{
                      "name": "region.test", "begin": "\\[", "end": "\\]",
                      "applyEndPatternLast": {},
                      "patterns": [{{ "name": "child.test", "match": "\\]\\]" }}]
                    }},
                    {{ "name": "first.test", "match": "ab" }},
                    {{ "name": "second.test", "match": "abc" }}
                  ]
                }}"#,
                u8::from(last)
            ))
        };

        let doc = "[]]abc";
        let normal = grammar(false);
        let tokens = normal.scan(doc).unwrap();
        insta::assert_snapshot!(format_tokens(doc, &tokens), @r#"
        "[" 0..1 source.test region.test
        "]" 1..2 source.test region.test
        "]" 2..3 source.test
        "ab" 3..5 source.test first.test
        "c" 5..6 source.test
        "#);

        let last = grammar(true);
        let tokens = last.scan(doc).unwrap();
        insta::assert_snapshot!(format_tokens(doc, &tokens), @r#"
        "[" 0..1 source.test region.test
        "]]" 1..3 source.test region.test child.test
        "abc" 3..6 source.test region.test
        "#);
    }

    #[test]
    fn empty_matches_always_make_progress() {
        let doc = "abc";

        let lookahead = compile(
            r#"{ "scopeName": "source.test", "patterns": [{ "name": "look.test", "match": "(?=b)" }] }"#,
        );
        let tokens = lookahead.scan(doc).unwrap();
        assert_contiguous(doc, &tokens);
        assert_eq!(tokens.len(), 3);
        assert!(tokens.iter().all(|t| scopes_of(t) == vec!["source.test"]));

        let empty_region = compile(
            r#"{ "scopeName": "source.test", "patterns": [{ "name": "r.test", "begin": "(?=b)", "end": "(?=b)" }] }"#,
        );
        let tokens = empty_region.scan(doc).unwrap();
        assert_contiguous(doc, &tokens);
        assert_eq!(tokens.len(), 3);

        let recursive = compile(
            r#"{
              "scopeName": "source.test",
              "patterns": [{
                "name": "r.test", "begin": "(?=b)", "end": "z",
                "patterns": [{ "include": "$self" }]
              }]
            }"#,
        );
        let mut tokenizer = Tokenizer::new(&recursive);
        let line = tokenizer
            .scan_line(doc, &StackState::initial(&recursive))
            .unwrap();
        assert_contiguous(doc, &line.tokens);
        assert_eq!(scopes_of(&line.tokens[0]), vec!["source.test"]);
        assert_eq!(scopes_of(&line.tokens[1]), vec!["source.test", "r.test"]);
        assert_eq!(line.state.depth(), 1);

        // zero-width at every position, in a multi-byte string
        let everywhere = compile(
            r#"{ "scopeName": "source.test", "patterns": [{ "match": "", "name": "e.test" }] }"#,
        );
        let doc = "héllo ✓\n";
        let tokens = everywhere.scan(doc).unwrap();
        assert_contiguous(doc, &tokens);
        assert_eq!(tokens.len(), doc.chars().count());
    }

    #[test]
    fn end_pattern_uses_begin_captures() {
        let grammar = compile(
            r#"{
              "scopeName": "source.test",
              "patterns": [{
                "name": "string.heredoc.test",
                "begin": "<<(\\w+)",
                "end": "^\\1$",
                "beginCaptures": { "1": "entity.name.tag.test" }
              }]
            }"#,
        );
        let doc = "<<EOT\nEOF\nEOT\nafter";
        let tokens = grammar.scan(doc).unwrap();
        insta::assert_snapshot!(format_tokens(doc, &tokens), @r#"
        "<<" 0..2 source.test string.heredoc.test
        "EOT" 2..5 source.test string.heredoc.test entity.name.tag.test
        "\n" 5..6 source.test string.heredoc.test
        "EOF\n" 6..10 source.test string.heredoc.test
        "EOT" 10..13 source.test string.heredoc.test
        "\n" 13..14 source.test
        "after" 14..19 source.test
        "#);
    }

    #[test]
    fn content_name_is_not_applied_to_delimiters() {
        let grammar = compile(
            r#"{
              "scopeName": "source.test",
              "patterns": [{
                "name": "meta.block.test", "contentName": "meta.body.test",
                "begin": "\\{", "end": "\\}"
              }]
            }"#,
        );
        let doc = "{x}";
        let tokens = grammar.scan(doc).unwrap();
        insta::assert_snapshot!(format_tokens(doc, &tokens), @r#"
        "{" 0..1 source.test meta.block.test
        "x" 1..2 source.test meta.block.test meta.body.test
        "}" 2..3 source.test meta.block.test
        "#);
    }

    #[test]
    fn anchors_only_match_where_they_can() {
        let grammar = compile(
            r#"{
              "scopeName": "source.test",
              "patterns": [
                { "name": "first.test", "match": "\\A\\w+" },
                {
                  "name": "meta.tag.test", "begin": "<", "end": ">",
                  "patterns": [
                    { "name": "entity.name.tag.test", "match": "\\G\\w+" },
                    { "name": "attr.test", "match": "\\w+" }
                  ]
                },
                { "name": "word.test", "match": "\\w+" }
              ]
            }"#,
        );
        let doc = "ab cd\nef <a\nb>";
        let tokens = grammar.scan(doc).unwrap();
        insta::assert_snapshot!(format_tokens(doc, &tokens), @r#"
        "ab" 0..2 source.test first.test
        " " 2..3 source.test
        "cd" 3..5 source.test word.test
        "\n" 5..6 source.test
        "ef" 6..8 source.test word.test
        " " 8..9 source.test
        "<" 9..10 source.test meta.tag.test
        "a" 10..11 source.test meta.tag.test entity.name.tag.test
        "\n" 11..12 source.test meta.tag.test
        "b" 12..13 source.test meta.tag.test attr.test
        ">" 13..14 source.test meta.tag.test
        "#);
    }

    #[test]
    fn sample_tokens_are_contiguous_and_stable() {
        let grammar = saffron_grammar();
        let doc = sample();
        let tokens = grammar.scan(&doc).unwrap();
        assert_contiguous(&doc, &tokens);
        // scanning again with a reused tokenizer gives the same output
        let mut tokenizer = Tokenizer::new(&grammar);
        assert_eq!(tokenizer.scan(&doc).unwrap(), tokens);
        assert_eq!(tokenizer.scan(&doc).unwrap(), tokens);
    }

    #[test]
    fn scanning_line_by_line_gives_the_same_tokens() {
        let grammar = saffron_grammar();
        let doc = sample();
        let expected = grammar.scan(&doc).unwrap();

        let mut tokenizer = Tokenizer::new(&grammar);
        let mut state = StackState::initial(&grammar);
        let mut offset = 0;
        let mut tokens = Vec::new();
        for line in doc.split_inclusive('\n') {
            let res = tokenizer.scan_line(line, &state).unwrap();
            tokens.extend(res.tokens.into_iter().map(|t| Token {
                span: t.span.start + offset..t.span.end + offset,
                scopes: t.scopes,
            }));
            state = res.state;
            offset += line.len();
        }
        assert_eq!(tokens, expected);
        // the sample ends in an unterminated string
        assert_eq!(state.depth(), 1);
    }

    #[test]
    fn states_are_equal_when_the_same_regions_are_open() {
        let grammar = saffron_grammar();
        let mut tokenizer = Tokenizer::new(&grammar);
        let initial = StackState::initial(&grammar);
        let a = tokenizer.scan_line("let a = \"open\n", &initial).unwrap();
        let b = tokenizer.scan_line("  \"also open\n", &initial).unwrap();
        assert_eq!(a.state, b.state);
        assert_eq!(
            a.state.scopes(),
            &[
                Scope::new("source.saffron"),
                Scope::new("string.quoted.double.saffron")
            ]
        );

        let closed = tokenizer.scan_line("done\"\n", &a.state).unwrap();
        assert!(closed.state.is_root());
        // not the first line anymore
        assert_ne!(closed.state, initial);
    }

    #[test]
    fn can_resume_from_checkpoint() {
        let grammar = saffron_grammar();
        let doc = sample();
        let mut tokenizer = Tokenizer::new(&grammar);
        let all: Vec<_> = tokenizer
            .lines(&doc)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(all.len(), doc.split_inclusive('\n').count());

        for resume_at in [0, 3, 11, all.len() - 1] {
            let checkpoint = all[resume_at].checkpoint();
            let rest: Vec<_> = tokenizer
                .lines_from(&doc, checkpoint)
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            assert_eq!(rest, all[resume_at + 1..]);
        }

        let rest: Vec<_> = tokenizer
            .lines_from(&doc, Checkpoint::start(&grammar))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rest, all);
    }

    #[test]
    fn rejects_states_from_other_grammars() {
        let grammar = saffron_grammar();
        let mut tokenizer = Tokenizer::new(&grammar);
        let open = tokenizer
            .scan_line("\"open\n", &StackState::initial(&grammar))
            .unwrap();

        let other = compile(r#"{ "scopeName": "source.test", "patterns": [{ "match": "x" }] }"#);
        let err = Tokenizer::new(&other)
            .scan_line("x\n", &open.state)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let mut checkpoint = Checkpoint::start(&grammar);
        checkpoint.offset = 100;
        assert!(matches!(
            tokenizer.lines_from("short", checkpoint),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn cancelled_scan_returns_no_tokens() {
        let grammar = saffron_grammar();
        let token = CancellationToken::new();
        let mut tokenizer = Tokenizer::new(&grammar).with_cancellation(token.clone());
        assert!(tokenizer.scan("func main() {}").is_ok());

        token.cancel();
        assert!(matches!(
            tokenizer.scan("func main() {}"),
            Err(Error::Cancelled)
        ));
        let mut lines = tokenizer.lines("a\nb\n");
        assert!(matches!(lines.next(), Some(Err(Error::Cancelled))));
        assert!(lines.next().is_none());
    }

    #[test]
    fn grammar_can_be_shared_by_concurrent_scans() {
        let grammar = Arc::new(saffron_grammar());
        let doc = sample();
        let expected = grammar.scan(&doc).unwrap();

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let grammar = Arc::clone(&grammar);
                    let doc = &doc;
                    s.spawn(move || grammar.scan(doc).unwrap())
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }
}
