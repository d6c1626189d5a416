//! Configuration keys and the data-file loader.
//!
//! The engine reads its settings from the data store itself:
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `Config.TagStart` | marker tag after `<?` (default `cs`) |
//! | `Config.VarEscapeMode` | default escaping for `var`: `none`, `html`, `js` or `url` |
//! | `hdf.loadpaths.*` | directories searched for relative template paths |
//!
//! Data files use a line-oriented format:
//!
//! ```text
//! # comment
//! Page.Title = Hello
//! Page {
//!   Body << EOM
//! several
//! lines
//! EOM
//! }
//! ```

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{CsError, Result};
use crate::hdf::{DataStore, Hdf};
use crate::template::EscapeMode;

// ── Store accessors ───────────────────────────────────────────────────────────

pub const TAG_START: &str = "Config.TagStart";
pub const VAR_ESCAPE_MODE: &str = "Config.VarEscapeMode";
pub const LOAD_PATHS: &str = "hdf.loadpaths";

/// The marker tag, `cs` unless overridden.
pub fn tag_start(store: &dyn DataStore) -> String {
    store.get_value(TAG_START, Some("cs")).unwrap_or("cs").to_owned()
}

/// The default escaping mode for `var`.
pub fn var_escape_mode(store: &dyn DataStore) -> Result<EscapeMode> {
    match store.get_value(VAR_ESCAPE_MODE, None) {
        None => Ok(EscapeMode::None),
        Some(v) => EscapeMode::from_config(v).ok_or_else(|| {
            CsError::Config(format!("Invalid value for {VAR_ESCAPE_MODE} (none,html,js,url): {v}"))
        }),
    }
}

/// Values of the `hdf.loadpaths` children, in order.
pub fn load_paths(store: &dyn DataStore) -> Vec<String> {
    let mut out = Vec::new();
    let Some(parent) = store.get_obj(LOAD_PATHS) else { return out };
    let mut cur = store.child(parent);
    while let Some(id) = cur {
        if let Some(v) = store.value(id) {
            out.push(v.to_owned());
        }
        cur = store.next(id);
    }
    out
}

// ── Data files ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a data file.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// `name = value`, `name << TERM` or `name {`.
const LINE_PATTERN: &str = r"^([A-Za-z0-9_.\-*]+)\s*(=|<<|\{)\s*(.*)$";

static LINE_RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

fn line_regex() -> std::result::Result<&'static Regex, &'static regex::Error> {
    LINE_RE.get_or_init(|| Regex::new(LINE_PATTERN)).as_ref()
}

/// Load data-file text into `hdf`.
///
/// Bad lines are reported and skipped; the rest of the text still loads.
pub fn load_str(hdf: &mut Hdf, text: &str) -> Vec<ConfigError> {
    let mut errors = Vec::new();
    let line_re = match line_regex() {
        Ok(re) => re,
        Err(e) => {
            errors.push(ConfigError { line: 0, message: e.to_string() });
            return errors;
        }
    };

    // Open `name {` prefixes, with the line each was opened on.
    let mut prefixes: Vec<(String, usize)> = Vec::new();
    let mut lines = text.lines().enumerate();

    while let Some((i, raw)) = lines.next() {
        let lineno = i + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == "}" {
            if prefixes.pop().is_none() {
                errors.push(ConfigError { line: lineno, message: "Too many }".into() });
            }
            continue;
        }

        let Some(caps) = line_re.captures(line) else {
            errors.push(ConfigError { line: lineno, message: format!("Unable to parse line: {line}") });
            continue;
        };
        let full = match prefixes.last() {
            Some((prefix, _)) => format!("{prefix}.{}", &caps[1]),
            None => caps[1].to_owned(),
        };
        let rest = caps[3].trim();

        match &caps[2] {
            "=" => hdf.set(&full, rest),
            "{" => {
                if !rest.is_empty() {
                    errors.push(ConfigError {
                        line: lineno,
                        message: format!("Unexpected text after {{: {rest}"),
                    });
                }
                prefixes.push((full, lineno));
            }
            _ => {
                if rest.is_empty() {
                    errors.push(ConfigError {
                        line: lineno,
                        message: format!("Missing terminator for multi-line value {full}"),
                    });
                    continue;
                }
                let mut body: Vec<&str> = Vec::new();
                let mut closed = false;
                for (_, l) in lines.by_ref() {
                    if l.trim() == rest {
                        closed = true;
                        break;
                    }
                    body.push(l);
                }
                if !closed {
                    errors.push(ConfigError {
                        line: lineno,
                        message: format!("Missing end {rest} of multi-line value {full}"),
                    });
                }
                hdf.set(&full, body.join("\n"));
            }
        }
    }

    for (prefix, line) in prefixes {
        errors.push(ConfigError { line, message: format!("Missing matching }} for {prefix} {{") });
    }
    errors
}

/// Read and load a data file from disk.
pub fn load_file(hdf: &mut Hdf, path: &Path) -> std::io::Result<Vec<ConfigError>> {
    let text = std::fs::read_to_string(path)?;
    Ok(load_str(hdf, &text))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
