use crate::grammars::Grammar;
use crate::tokenizer::Token;

pub(crate) const GRAMMAR_PATH: &str = "src/fixtures/saffron.json";
pub(crate) const SAMPLE_PATH: &str = "src/fixtures/samples/sample.saf";

pub(crate) fn saffron_grammar() -> Grammar {
    Grammar::load_from_file(GRAMMAR_PATH).unwrap()
}

pub(crate) fn scopes_of(token: &Token) -> Vec<&str> {
    token.scopes.iter().map(|s| s.as_str()).collect()
}

/// One line per token: `"text" start..end scope scope...`
pub(crate) fn format_tokens(doc: &str, tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        out.push_str(&format!(
            "{:?} {}..{} {}\n",
            &doc[token.span.clone()],
            token.start(),
            token.end(),
            scopes_of(token).join(" ")
        ));
    }
    out
}

/// Tokens must cover the whole document, in order, without gaps or empty tokens,
/// and always start with the grammar scope
pub(crate) fn assert_contiguous(doc: &str, tokens: &[Token]) {
    let mut expected_start = 0;
    for token in tokens {
        assert_eq!(token.start(), expected_start, "gap or overlap at {token:?}");
        assert!(token.end() > token.start(), "empty token {token:?}");
        assert!(doc.is_char_boundary(token.end()), "{token:?} splits a char");
        assert!(!token.scopes.is_empty(), "{token:?} has no scopes");
        expected_start = token.end();
    }
    assert_eq!(expected_start, doc.len(), "tokens don't reach the end");
    if let Some(first) = tokens.first() {
        let root = &first.scopes[0];
        assert!(tokens.iter().all(|t| &t.scopes[0] == root));
    }
}
