//! Expression tokenizer, AST and parser.
//!
//! Directive arguments such as `Page.Count > #3 && ?Page.Title` are scanned
//! into a flat token list and then split recursively at the rightmost
//! lowest-precedence operator.  Operator classes, lowest binding first:
//!
//!   comma  →  `||`  →  `&&`  →  `== !=`  →  `> >= < <=`  →  `+ -`  →
//!   `* / %`  →  unary `! ?`  →  `[ . (`
//!
//! Parenthesised and bracketed groups are skipped as units while looking for
//! a split point.  Evaluation lives in [`super::eval`].

use std::rc::Rc;

use super::functions::{Function, FunctionTable};
use super::value::strtol;

/// Upper bound on tokens in a single expression.
pub const MAX_TOKENS: usize = 256;

/// Characters that end a bare word, `$name` or `#name`.
pub(crate) const DELIMITERS: &[u8] = b"\"?<>=!#-+|&,)*/%[]( \t\r\n";

// ── Token ─────────────────────────────────────────────────────────────────────

/// Operator tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Not,
    Exists,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
}

impl Op {
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Not => "!",
            Op::Exists => "?",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::And => "&&",
            Op::Or => "||",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::LParen => "(",
            Op::RParen => ")",
            Op::LBracket => "[",
            Op::RBracket => "]",
            Op::Dot => ".",
            Op::Comma => ",",
        }
    }

    fn is_unary(self) -> bool {
        matches!(self, Op::Not | Op::Exists | Op::LParen)
    }

    /// Operators allowed on the left of `set:`.
    fn is_lvalue(self) -> bool {
        matches!(self, Op::Dot | Op::LBracket | Op::RBracket)
    }
}

/// Operators in match order: two-character forms first.
const OPERATORS: [(&str, Op); 21] = [
    ("<=", Op::Lte),
    (">=", Op::Gte),
    ("==", Op::Eq),
    ("!=", Op::Ne),
    ("||", Op::Or),
    ("&&", Op::And),
    ("!", Op::Not),
    ("?", Op::Exists),
    ("<", Op::Lt),
    (">", Op::Gt),
    ("+", Op::Add),
    ("-", Op::Sub),
    ("*", Op::Mul),
    ("/", Op::Div),
    ("%", Op::Mod),
    ("(", Op::LParen),
    (")", Op::RParen),
    ("[", Op::LBracket),
    ("]", Op::RBracket),
    (".", Op::Dot),
    (",", Op::Comma),
];

/// Precedence classes, lowest binding first.
const PRECEDENCE: [&[Op]; 9] = [
    &[Op::Comma],
    &[Op::Or],
    &[Op::And],
    &[Op::Eq, Op::Ne],
    &[Op::Gt, Op::Gte, Op::Lt, Op::Lte],
    &[Op::Add, Op::Sub],
    &[Op::Mul, Op::Div, Op::Mod],
    &[Op::Not, Op::Exists],
    &[Op::LBracket, Op::Dot, Op::LParen],
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Str(String),
    /// Numeric literal with its source text.
    Num(i64, String),
    Var(String),
    /// `#name`: variable forced to numeric evaluation.
    VarNum(String),
    Op(Op),
}

impl Token {
    fn op(&self) -> Option<Op> {
        match self {
            Token::Op(op) => Some(*op),
            _ => None,
        }
    }

    fn is(&self, op: Op) -> bool {
        self.op() == Some(op)
    }

    fn describe(&self, index: usize) -> String {
        match self {
            Token::Str(s) => format!("{index}:s:'{s}'"),
            Token::Num(_, text) => format!("{index}:n:'{text}'"),
            Token::Var(s) => format!("{index}:v:'{s}'"),
            Token::VarNum(s) => format!("{index}:vn:'{s}'"),
            Token::Op(op) => format!("{index}:{}", op.symbol()),
        }
    }
}

// ── Tokenizer ─────────────────────────────────────────────────────────────────

/// Index of the first delimiter in `s`, or `None`.
fn find_delimiter(s: &str) -> Option<usize> {
    s.bytes().position(|b| DELIMITERS.contains(&b))
}

fn match_operator(rest: &str) -> Option<(Op, usize)> {
    OPERATORS
        .iter()
        .find(|(sym, _)| rest.starts_with(sym))
        .map(|(sym, op)| (*op, sym.len()))
}

/// Scan `src` into tokens.
pub fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut last_is_op = true;

    while pos < bytes.len() {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }
        let c = bytes[pos];
        let rest = &src[pos..];

        // A sign right after an operator belongs to the following literal.
        let signed = last_is_op && (c == b'+' || c == b'-');
        if let Some((op, len)) = (!signed).then(|| match_operator(rest)).flatten() {
            tokens.push(Token::Op(op));
            pos += len;
            if !matches!(op, Op::RParen | Op::RBracket) {
                last_is_op = true;
            }
        } else {
            match c {
                b'#' => {
                    let after = &rest[1..];
                    let (n, used) = strtol(after);
                    if used > 0 {
                        tokens.push(Token::Num(n, after[..used].to_owned()));
                        pos += 1 + used;
                    } else {
                        let end = find_delimiter(after).unwrap_or(after.len());
                        if end == 0 {
                            return Err(format!("Missing varname/number after #: {after}"));
                        }
                        tokens.push(Token::VarNum(after[..end].to_owned()));
                        pos += 1 + end;
                    }
                }
                b'"' | b'\'' => {
                    let body = &rest[1..];
                    let Some(end) = body.find(c as char) else {
                        return Err(format!("Missing end of string: {body}"));
                    };
                    tokens.push(Token::Str(body[..end].to_owned()));
                    pos += end + 2;
                }
                b'$' => {
                    let after = &rest[1..];
                    let end = find_delimiter(after).unwrap_or(after.len());
                    if end == 0 {
                        return Err(format!("Missing varname after $: {after}"));
                    }
                    tokens.push(Token::Var(after[..end].to_owned()));
                    pos += 1 + end;
                }
                _ => {
                    let (n, used) = strtol(rest);
                    let delim = find_delimiter(rest);
                    let is_number = used > 0
                        && match delim {
                            Some(d) => d <= used,
                            None => used == rest.len(),
                        };
                    if is_number {
                        tokens.push(Token::Num(n, rest[..used].to_owned()));
                        pos += used;
                    } else {
                        let end = delim.unwrap_or(rest.len());
                        if end == 0 {
                            return Err(format!("Var arg specified with no varname: {rest}"));
                        }
                        tokens.push(Token::Var(rest[..end].to_owned()));
                        pos += end;
                    }
                }
            }
            last_is_op = false;
        }

        if tokens.len() >= MAX_TOKENS {
            return Err(format!(
                "Expression exceeds maximum number of tokens of {MAX_TOKENS}: {src}"
            ));
        }
    }
    Ok(tokens)
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// `a.b`
    Dot,
    /// `a[b]`
    Bracket,
}

impl BinOp {
    fn from_op(op: Op) -> Option<Self> {
        Some(match op {
            Op::Or => BinOp::Or,
            Op::And => BinOp::And,
            Op::Eq => BinOp::Eq,
            Op::Ne => BinOp::Ne,
            Op::Lt => BinOp::Lt,
            Op::Lte => BinOp::Lte,
            Op::Gt => BinOp::Gt,
            Op::Gte => BinOp::Gte,
            Op::Add => BinOp::Add,
            Op::Sub => BinOp::Sub,
            Op::Mul => BinOp::Mul,
            Op::Div => BinOp::Div,
            Op::Mod => BinOp::Mod,
            Op::Dot => BinOp::Dot,
            Op::LBracket => BinOp::Bracket,
            _ => return None,
        })
    }
}

/// A parsed expression.  Every node owns its operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Num(i64),
    Var(String),
    VarNum(String),
    Unary(UnaryOp, Box<Expr>),
    Paren(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Comma list in source order.
    Comma(Vec<Expr>),
    Call { function: Rc<Function>, args: Vec<Expr> },
}

impl Expr {
    /// Split a comma list into call arguments.
    pub fn into_args(self) -> Vec<Expr> {
        match self {
            Expr::Comma(items) => items,
            other => vec![other],
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Tokenize and parse `src`.  In `lvalue` mode only names, `.` and `[]` are
/// accepted, as required on the left of `set:`.
pub fn parse_expr(src: &str, lvalue: bool, functions: &FunctionTable) -> Result<Expr, String> {
    let tokens = tokenize(src)?;
    Parser { functions }.parse(&tokens, lvalue)
}

struct Parser<'f> {
    functions: &'f FunctionTable,
}

impl Parser<'_> {
    fn parse(&self, toks: &[Token], lvalue: bool) -> Result<Expr, String> {
        let n = toks.len();
        if n == 0 {
            return Err("Bad Expression".into());
        }
        if n == 1 {
            return match &toks[0] {
                Token::Str(s) => Ok(Expr::Str(s.clone())),
                Token::Num(v, _) => Ok(Expr::Num(*v)),
                Token::Var(s) => Ok(Expr::Var(s.clone())),
                Token::VarNum(s) => Ok(Expr::VarNum(s.clone())),
                Token::Op(op) => Err(format!(
                    "Terminal token is not an argument, type is {}",
                    op.symbol()
                )),
            };
        }

        for class in PRECEDENCE {
            let mut x = n as isize - 1;
            while x >= 0 {
                let mut i = x as usize;
                if toks[i].is(Op::RParen) {
                    i = skip_group(toks, i, Op::LParen, Op::RParen)
                        .ok_or("Missing left parenthesis in expression")?;
                }
                if toks[i].is(Op::RBracket) {
                    i = skip_group(toks, i, Op::LBracket, Op::RBracket)
                        .ok_or("Missing left bracket in expression")?;
                    if i == 0 {
                        break;
                    }
                }
                if lvalue && toks[i].op().is_some_and(|op| !op.is_lvalue()) {
                    return Err(format!("Invalid op '{}' in lvalue", toks[i].op().map_or("", Op::symbol)));
                }
                if let Some(op) = toks[i].op().filter(|op| class.contains(op)) {
                    if op.is_unary() {
                        if i == 0 {
                            return self.unary(op, toks, lvalue);
                        }
                    } else if op == Op::Comma {
                        let right = self.parse(&toks[i + 1..], lvalue)?;
                        let left = self.parse(&toks[..i], lvalue)?;
                        let mut items = left.into_args();
                        items.push(right);
                        return Ok(Expr::Comma(items));
                    } else {
                        let right = if op == Op::LBracket {
                            if !toks[n - 1].is(Op::RBracket) {
                                return Err("Missing right bracket in expression".into());
                            }
                            // Bracket contents are values, not assignment targets.
                            self.parse(&toks[i + 1..n - 1], false)?
                        } else {
                            self.parse(&toks[i + 1..], lvalue)?
                        };
                        let left = self.parse(&toks[..i], lvalue)?;
                        let bin = BinOp::from_op(op).ok_or("Bad Expression")?;
                        return Ok(Expr::Binary(bin, Box::new(left), Box::new(right)));
                    }
                }
                x = i as isize - 1;
            }
        }

        // Unary operator applied to a whole parenthesised expression.
        if let Some(op) = toks[0].op().filter(|op| op.is_unary()) {
            if toks[1].is(Op::LParen) && toks[n - 1].is(Op::RParen) && op != Op::LParen {
                let inner = self.parse(&toks[2..n - 1], lvalue)?;
                return Ok(wrap_unary(op, Expr::Paren(Box::new(inner))));
            }
            let inner = self.parse(&toks[1..], lvalue)?;
            return Ok(wrap_unary(op, inner));
        }

        if let Token::Var(name) = &toks[0] {
            if toks[1].is(Op::LParen) && toks[n - 1].is(Op::RParen) {
                return self.call(name, &toks[2..n - 1], lvalue);
            }
        }

        let listing: Vec<String> = toks.iter().enumerate().map(|(i, t)| t.describe(i)).collect();
        Err(format!("Bad Expression:{}", listing.join("  ")))
    }

    fn unary(&self, op: Op, toks: &[Token], lvalue: bool) -> Result<Expr, String> {
        let n = toks.len();
        if op == Op::LParen {
            if !toks[n - 1].is(Op::RParen) {
                return Err("Missing right parenthesis in expression".into());
            }
            let inner = self.parse(&toks[1..n - 1], lvalue)?;
            return Ok(Expr::Paren(Box::new(inner)));
        }
        let inner = self.parse(&toks[1..], lvalue)?;
        Ok(wrap_unary(op, inner))
    }

    fn call(&self, name: &str, inner: &[Token], lvalue: bool) -> Result<Expr, String> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| format!("Unknown function {name} called"))?;
        let args = if inner.is_empty() {
            Vec::new()
        } else {
            self.parse(inner, lvalue)?.into_args()
        };
        if args.len() != function.arity {
            return Err(format!(
                "Incorrect number of arguments in call to {name}, expected {}, got {}",
                function.arity,
                args.len()
            ));
        }
        Ok(Expr::Call { function, args })
    }
}

fn wrap_unary(op: Op, inner: Expr) -> Expr {
    match op {
        Op::Not => Expr::Unary(UnaryOp::Not, Box::new(inner)),
        Op::Exists => Expr::Unary(UnaryOp::Exists, Box::new(inner)),
        _ => Expr::Paren(Box::new(inner)),
    }
}

/// From the closing token at `close_at`, walk left to its matching opener.
fn skip_group(toks: &[Token], close_at: usize, open: Op, close: Op) -> Option<usize> {
    let mut depth = 1;
    let mut i = close_at;
    while i > 0 {
        i -= 1;
        if toks[i].is(close) {
            depth += 1;
        }
        if toks[i].is(open) {
            depth -= 1;
        }
        if depth == 0 {
            return Some(i);
        }
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::builtins;

    fn table() -> FunctionTable {
        let mut t = FunctionTable::new();
        builtins::register_all(&mut t).unwrap();
        t
    }

    fn parse(src: &str) -> Expr {
        parse_expr(src, false, &table()).unwrap()
    }

    fn parse_err(src: &str) -> String {
        parse_expr(src, false, &table()).unwrap_err()
    }

    fn var(s: &str) -> Box<Expr> {
        Box::new(Expr::Var(s.into()))
    }

    fn num(n: i64) -> Box<Expr> {
        Box::new(Expr::Num(n))
    }

    #[test]
    fn tokenize_operators_greedy() {
        let toks = tokenize("a<=b").unwrap();
        assert_eq!(toks, vec![Token::Var("a".into()), Token::Op(Op::Lte), Token::Var("b".into())]);
        let toks = tokenize("!a").unwrap();
        assert_eq!(toks, vec![Token::Op(Op::Not), Token::Var("a".into())]);
    }

    #[test]
    fn tokenize_sign_after_operator_is_literal() {
        let toks = tokenize("1 - -2").unwrap();
        assert_eq!(
            toks,
            vec![Token::Num(1, "1".into()), Token::Op(Op::Sub), Token::Num(-2, "-2".into())]
        );
        // Leading sign at the start of an expression.
        assert_eq!(tokenize("-5").unwrap(), vec![Token::Num(-5, "-5".into())]);
    }

    #[test]
    fn tokenize_sign_after_close_paren_is_operator() {
        let toks = tokenize("(a)-1").unwrap();
        assert_eq!(toks[3], Token::Op(Op::Sub));
        assert_eq!(toks[4], Token::Num(1, "1".into()));
    }

    #[test]
    fn tokenize_hash_sigil() {
        assert_eq!(tokenize("#0x10").unwrap(), vec![Token::Num(16, "0x10".into())]);
        assert_eq!(tokenize("#Page.Count").unwrap(), vec![Token::VarNum("Page.Count".into())]);
        assert!(tokenize("#").unwrap_err().starts_with("Missing varname/number after #"));
    }

    #[test]
    fn tokenize_strings_and_dollar() {
        assert_eq!(tokenize("'it''s'").unwrap(), vec![Token::Str("it".into()), Token::Str("s".into())]);
        assert_eq!(tokenize("\"a b\"").unwrap(), vec![Token::Str("a b".into())]);
        assert!(tokenize("\"open").unwrap_err().starts_with("Missing end of string"));
        assert_eq!(tokenize("$x.y").unwrap(), vec![Token::Var("x.y".into())]);
        assert!(tokenize("$ ").unwrap_err().starts_with("Missing varname after $"));
    }

    #[test]
    fn tokenize_dotted_names_are_single_tokens() {
        assert_eq!(tokenize("Page.Items.0").unwrap(), vec![Token::Var("Page.Items.0".into())]);
    }

    #[test]
    fn tokenize_bare_equals_is_an_error() {
        assert!(tokenize("a = b").unwrap_err().starts_with("Var arg specified with no varname"));
    }

    #[test]
    fn tokenize_token_limit() {
        let src = vec!["1"; 200].join("+");
        assert!(tokenize(&src).unwrap_err().starts_with("Expression exceeds maximum number of tokens"));
    }

    #[test]
    fn parse_precedence() {
        assert_eq!(
            parse("1 + 2 * 3"),
            Expr::Binary(BinOp::Add, num(1), Box::new(Expr::Binary(BinOp::Mul, num(2), num(3))))
        );
        assert_eq!(
            parse("a || b && c"),
            Expr::Binary(BinOp::Or, var("a"), Box::new(Expr::Binary(BinOp::And, var("b"), var("c"))))
        );
    }

    #[test]
    fn parse_is_left_associative() {
        assert_eq!(
            parse("1 - 2 - 3"),
            Expr::Binary(BinOp::Sub, Box::new(Expr::Binary(BinOp::Sub, num(1), num(2))), num(3))
        );
    }

    #[test]
    fn parse_parens_group() {
        assert_eq!(
            parse("(1 + 2) * 3"),
            Expr::Binary(
                BinOp::Mul,
                Box::new(Expr::Paren(Box::new(Expr::Binary(BinOp::Add, num(1), num(2))))),
                num(3)
            )
        );
    }

    #[test]
    fn parse_unary() {
        assert_eq!(parse("!a"), Expr::Unary(UnaryOp::Not, var("a")));
        assert_eq!(parse("?a.b"), Expr::Unary(UnaryOp::Exists, var("a.b")));
        assert_eq!(
            parse("!a == b"),
            Expr::Binary(BinOp::Eq, Box::new(Expr::Unary(UnaryOp::Not, var("a"))), var("b"))
        );
    }

    #[test]
    fn parse_bracket_and_dot() {
        assert_eq!(parse("a[1]"), Expr::Binary(BinOp::Bracket, var("a"), num(1)));
        assert_eq!(
            parse("a[i].name"),
            Expr::Binary(
                BinOp::Dot,
                Box::new(Expr::Binary(BinOp::Bracket, var("a"), var("i"))),
                var("name")
            )
        );
    }

    #[test]
    fn parse_comma_list_in_order() {
        assert_eq!(parse("1, 2, 3"), Expr::Comma(vec![Expr::Num(1), Expr::Num(2), Expr::Num(3)]));
    }

    #[test]
    fn parse_function_call() {
        match parse("string.slice(s, 1, 3)") {
            Expr::Call { function, args } => {
                assert_eq!(function.name, "string.slice");
                assert_eq!(args.len(), 3);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn parse_function_errors() {
        assert_eq!(parse_err("nosuch(1)"), "Unknown function nosuch called");
        assert_eq!(
            parse_err("max(1)"),
            "Incorrect number of arguments in call to max, expected 2, got 1"
        );
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse_err(""), "Bad Expression");
        assert_eq!(parse_err("a)"), "Missing left parenthesis in expression");
        assert_eq!(parse_err("a]"), "Missing left bracket in expression");
        assert!(parse_err("+").starts_with("Terminal token is not an argument"));
        assert!(parse_err("a b").starts_with("Bad Expression:"));
    }

    #[test]
    fn lvalue_mode_restricts_operators() {
        let t = table();
        assert!(parse_expr("a.b[c + 1]", true, &t).is_ok());
        assert_eq!(parse_expr("a + 1", true, &t).unwrap_err(), "Invalid op '+' in lvalue");
        assert!(parse_expr("\"literal\"", true, &t).is_ok());
    }
}
