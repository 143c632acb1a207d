mod compiled;
mod raw;
mod regex;

pub use compiled::*;
pub use raw::{BoolOrInt, RawCapture, RawCaptures, RawGrammar, RawRepositoryEntry, RawRule};
pub use regex::{Regex, RegexMatch, has_backreferences, resolve_backreferences};
