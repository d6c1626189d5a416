//! Error types shared by the parser, the evaluator and the data store.

use std::fmt;

use thiserror::Error;

/// Where in the template source an error was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A line inside a template loaded from a file.
    File { path: String, line: usize },
    /// A line inside in-memory text with a descriptive name (an `evar` variable).
    Named { name: String, line: usize },
    /// A line inside anonymous in-memory text.
    Line(usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::File { path, line } => write!(f, "[{path}:{line}]"),
            Location::Named { name, line } => write!(f, "[{name}:~{line}]"),
            Location::Line(line) => write!(f, "[lineno:~{line}]"),
        }
    }
}

/// Errors produced while parsing or rendering a template.
#[derive(Debug, Error)]
pub enum CsError {
    /// Malformed directive, illegal nesting, unknown command or function.
    #[error("{location} {message}")]
    Parse { location: Location, message: String },

    /// Missing include target or required variable.
    #[error("{location} {message}")]
    NotFound { location: Location, message: String },

    /// A load failed because the file does not exist; no source location yet.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// An internal invariant was broken.
    #[error("assertion failed: {0}")]
    Assert(String),

    /// An invalid configuration value in the data store.
    #[error("{0}")]
    Config(String),

    /// A function name was registered twice.
    #[error("attempt to register duplicate function {0}")]
    Duplicate(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CsError {
    /// True for the "content not found" kinds that an optional directive may swallow.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CsError::NotFound { .. } | CsError::FileNotFound(_))
    }
}

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, CsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_display_forms() {
        let f = Location::File { path: "page.cs".into(), line: 4 };
        assert_eq!(f.to_string(), "[page.cs:4]");
        let n = Location::Named { name: "Page.Body".into(), line: 2 };
        assert_eq!(n.to_string(), "[Page.Body:~2]");
        assert_eq!(Location::Line(7).to_string(), "[lineno:~7]");
    }

    #[test]
    fn parse_error_message_has_location_prefix() {
        let e = CsError::Parse { location: Location::Line(1), message: "Bad Expression".into() };
        assert_eq!(e.to_string(), "[lineno:~1] Bad Expression");
    }

    #[test]
    fn not_found_kinds() {
        assert!(CsError::FileNotFound("x".into()).is_not_found());
        assert!(CsError::NotFound { location: Location::Line(1), message: String::new() }.is_not_found());
        assert!(!CsError::Assert("x".into()).is_not_found());
    }
}
