//! Output escaping.
//!
//! Every `var` statement is stamped at parse time with the escaping mode of
//! the block it appears in.  At render time the mode is applied to string
//! values unless a self-escaping function already transformed the value
//! during the same evaluation.

use std::fmt::Write as _;

/// How a variable's text is sanitized before reaching the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscapeMode {
    #[default]
    None,
    Html,
    /// JavaScript string context (`js` in templates and configuration).
    Script,
    Url,
    /// Not known at parse time (macro bodies); resolved from the caller.
    Undef,
}

/// Mode names, in the order they are tried.
const MODE_NAMES: [(&str, EscapeMode); 4] = [
    ("none", EscapeMode::None),
    ("html", EscapeMode::Html),
    ("js", EscapeMode::Script),
    ("url", EscapeMode::Url),
];

impl EscapeMode {
    /// Exact name match, used for `Config.VarEscapeMode`.
    pub fn from_config(value: &str) -> Option<Self> {
        MODE_NAMES.iter().find(|(n, _)| *n == value).map(|(_, m)| *m)
    }

    /// Case-insensitive prefix match, used by the `escape:` directive.
    pub fn from_directive(value: &str) -> Option<Self> {
        let v = value.trim().as_bytes();
        MODE_NAMES
            .iter()
            .find(|(n, _)| v.len() >= n.len() && v[..n.len()].eq_ignore_ascii_case(n.as_bytes()))
            .map(|(_, m)| *m)
    }

    pub fn name(self) -> &'static str {
        match self {
            EscapeMode::None => "none",
            EscapeMode::Html => "html",
            EscapeMode::Script => "js",
            EscapeMode::Url => "url",
            EscapeMode::Undef => "undef",
        }
    }

    /// Apply this mode to `s`.  `Undef` behaves like `None`.
    pub fn apply(self, s: &str) -> String {
        match self {
            EscapeMode::None | EscapeMode::Undef => s.to_owned(),
            EscapeMode::Html => html_escape(s),
            EscapeMode::Script => js_escape(s),
            EscapeMode::Url => url_escape(s),
        }
    }
}

/// Per-session escaping state.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Escaping {
    /// Mode from `Config.VarEscapeMode`.
    pub global: EscapeMode,
    /// Mode the next pushed parse-stack entry should take instead of inheriting.
    pub next_stack: Option<EscapeMode>,
    /// Mode used for `Undef` nodes; set by `call`.
    pub when_undef: EscapeMode,
    /// Set when a self-escaping function ran during the current evaluation.
    pub explicit: bool,
}

/// HTML entity escaping; carriage returns are dropped.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

/// Escape for inclusion in a JavaScript string literal.
pub fn js_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '/' | '"' | '\'' | '\\' | '>' | '<' | '&' | ';' => {
                let _ = write!(out, "\\x{:02X}", ch as u32);
            }
            c if (c as u32) < 32 => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Form-style URL escaping: space becomes `+`, reserved and non-ASCII bytes
/// become `%XX`.
pub fn url_escape(s: &str) -> String {
    const RESERVED: &[u8] = b"$&+,/:;=?@\"'<>#%{}|\\^~[]`";
    let mut out = String::with_capacity(s.len() + 8);
    for &b in s.as_bytes() {
        if b == b' ' {
            out.push('+');
        } else if !(32..=122).contains(&b) || RESERVED.contains(&b) {
            let _ = write!(out, "%{b:02X}");
        } else {
            out.push(b as char);
        }
    }
    out
}
