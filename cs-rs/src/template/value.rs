//! Evaluation results and the numeric conversions the language uses.
//!
//! Template values are untyped text at heart.  An expression reduces either to
//! a literal (string or number) or to a *name* that is resolved against the
//! scope chain and the data store only when its text is needed.  Keeping the
//! name around is what lets `.` and `[]` build longer names and lets `?` ask
//! whether a variable exists.

use std::fmt;

/// The result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A string literal or computed string.
    Str(String),
    /// A string-typed result with no content (absent operand of `+`, missing
    /// variable passed through a string function).
    Null,
    /// A number.
    Num(i64),
    /// A variable name, resolved lazily.
    Var(String),
    /// A variable name forced to numeric interpretation with `#`.
    VarNum(String),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    /// Debug-oriented rendering; output goes through the evaluator instead.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Null => write!(f, "null"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Var(name) => write!(f, "{name}"),
            Value::VarNum(name) => write!(f, "#{name}"),
        }
    }
}

impl Value {
    /// `Num` or `VarNum`: operands that force numeric evaluation.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Num(_) | Value::VarNum(_))
    }

    /// The variable name for `Var`/`VarNum`.
    pub fn var_name(&self) -> Option<&str> {
        match self {
            Value::Var(n) | Value::VarNum(n) => Some(n),
            _ => None,
        }
    }

    /// Name of the kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "STRING",
            Value::Null => "STRING",
            Value::Num(_) => "NUM",
            Value::Var(_) => "VAR",
            Value::VarNum(_) => "VARNUM",
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<Option<String>> for Value {
    fn from(s: Option<String>) -> Self {
        s.map_or(Value::Null, Value::Str)
    }
}

// ── Numeric conversions ───────────────────────────────────────────────────────

/// Parse a leading integer with automatic base detection.
///
/// Leading whitespace and one sign are accepted; `0x`/`0X` selects hex, a
/// leading `0` selects octal.  Returns the value and the number of bytes
/// consumed, which is 0 when no digits were found.  Overflow saturates.
pub fn strtol(s: &str) -> (i64, usize) {
    let b = s.as_bytes();
    let mut i = 0;
    while i < b.len() && b[i].is_ascii_whitespace() {
        i += 1;
    }
    let mut neg = false;
    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        neg = b[i] == b'-';
        i += 1;
    }
    let (radix, start) = if b.len() > i + 2
        && b[i] == b'0'
        && (b[i + 1] == b'x' || b[i + 1] == b'X')
        && b[i + 2].is_ascii_hexdigit()
    {
        (16u32, i + 2)
    } else if i < b.len() && b[i] == b'0' {
        (8, i)
    } else {
        (10, i)
    };
    let mut j = start;
    let mut val: i64 = 0;
    while let Some(d) = b.get(j).and_then(|&c| (c as char).to_digit(radix)) {
        val = val.saturating_mul(radix as i64).saturating_add(d as i64);
        j += 1;
    }
    if j == start {
        return (0, 0);
    }
    (if neg { -val } else { val }, j)
}

/// True when the whole of `s` is one integer (as `strtol` reads it).
pub fn parse_whole(s: &str) -> Option<i64> {
    let (n, used) = strtol(s);
    (used > 0 && used == s.len()).then_some(n)
}

/// Decimal prefix parse; anything unparsable is 0.
pub fn atoi(s: &str) -> i64 {
    let b = s.as_bytes();
    let mut i = 0;
    while i < b.len() && b[i].is_ascii_whitespace() {
        i += 1;
    }
    let mut neg = false;
    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        neg = b[i] == b'-';
        i += 1;
    }
    let mut val: i64 = 0;
    while let Some(d) = b.get(i).filter(|c| c.is_ascii_digit()) {
        val = val.wrapping_mul(10).wrapping_add((d - b'0') as i64);
        i += 1;
    }
    if neg { -val } else { val }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
