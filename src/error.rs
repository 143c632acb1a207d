use std::fmt;
use std::io;

pub(crate) type ZafferanoResult<T> = Result<T, Error>;

/// Errors that can occur when loading a grammar or scanning with it
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar file
    /// or a dump file if the `dump` feature is enabled
    Io(io::Error),

    /// JSON parsing failed when loading a grammar.
    Json(serde_json::Error),

    /// YAML parsing failed when loading a grammar.
    Yaml(serde_yaml::Error),

    /// Bitcode encoding or decoding failed.
    #[cfg(feature = "dump")]
    Dump(bitcode::Error),

    /// A rule is structurally invalid, eg a `begin` without an `end`.
    /// `rule` is the path of the rule in the grammar document.
    #[allow(missing_docs)]
    InvalidRule { rule: String, reason: String },

    /// An `include` points to something the grammar doesn't define.
    /// Only happens at load time: a loaded grammar never has dangling includes.
    #[allow(missing_docs)]
    UnresolvedInclude { rule: String, include: String },

    /// A capture is keyed by a group name that the pattern doesn't define.
    #[allow(missing_docs)]
    UnknownCaptureGroup { rule: String, group: String },

    /// A pattern is not valid for the regex engine.
    /// This is normally caught at load time but patterns with back-references are
    /// only known when the region opens, so it could technically happen during a scan.
    #[allow(missing_docs)]
    PatternCompile {
        rule: String,
        pattern: String,
        message: String,
    },

    /// Asked the registry for a collection name it doesn't know about
    UnresolvedCollection(String),

    /// A stack state given to `scan_line` doesn't belong to this grammar.
    InvalidState(String),

    /// The scan was cancelled through its `CancellationToken`.
    /// Tokens produced before the cancellation are discarded.
    Cancelled,
}

impl Error {
    /// Whether this error can only come from loading a grammar
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Json(_)
                | Error::Yaml(_)
                | Error::InvalidRule { .. }
                | Error::UnresolvedInclude { .. }
                | Error::UnknownCaptureGroup { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::Yaml(err) => write!(f, "YAML parsing error: {}", err),
            #[cfg(feature = "dump")]
            Error::Dump(err) => write!(f, "bitcode error: {}", err),
            Error::InvalidRule { rule, reason } => {
                write!(f, "invalid rule at {}: {}", rule, reason)
            }
            Error::UnresolvedInclude { rule, include } => {
                write!(f, "rule at {} includes unknown '{}'", rule, include)
            }
            Error::UnknownCaptureGroup { rule, group } => {
                write!(f, "rule at {} captures unknown group '{}'", rule, group)
            }
            Error::PatternCompile {
                rule,
                pattern,
                message,
            } => write!(
                f,
                "invalid pattern '{}' in rule at {}: {}",
                pattern, rule, message
            ),
            Error::UnresolvedCollection(name) => write!(f, "collection '{}' not found", name),
            Error::InvalidState(reason) => write!(f, "invalid stack state: {}", reason),
            Error::Cancelled => write!(f, "scan cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Yaml(err) => Some(err),
            #[cfg(feature = "dump")]
            Error::Dump(err) => Some(err),
            Error::InvalidRule { .. }
            | Error::UnresolvedInclude { .. }
            | Error::UnknownCaptureGroup { .. }
            | Error::PatternCompile { .. }
            | Error::UnresolvedCollection(_)
            | Error::InvalidState(_)
            | Error::Cancelled => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Yaml(err)
    }
}

#[cfg(feature = "dump")]
impl From<bitcode::Error> for Error {
    fn from(err: bitcode::Error) -> Self {
        Error::Dump(err)
    }
}
