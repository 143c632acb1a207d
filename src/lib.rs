mod cancel;
mod error;
mod grammars;
mod registry;
mod scope;
mod tokenizer;

#[cfg(test)]
mod test_utils;

pub use cancel::CancellationToken;
pub use error::Error;
pub use grammars::{
    BeginEndRule, BoolOrInt, CollectionId, EndPattern, Grammar, IncludeRule, MatchRule,
    RawCapture, RawCaptures, RawGrammar, RawRepositoryEntry, RawRule, Regex, RegexId, RegexMatch,
    Rule, RuleId, has_backreferences, resolve_backreferences,
};
pub use registry::{Collection, Registry};
pub use scope::Scope;
pub use tokenizer::{Checkpoint, LineTokens, Lines, ScannedLine, StackState, Token, Tokenizer};
