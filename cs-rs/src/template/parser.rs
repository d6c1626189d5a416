//! Statement parser.
//!
//! Text is scanned for `<?cs` markers (the tag comes from `Config.TagStart`).
//! Text between markers becomes [`Stmt::Literal`]; each directive is matched
//! against the [`Command`] table and either appends a statement to the
//! innermost open block, opens a new block on the parse stack, or closes the
//! innermost one.
//!
//! `evar` and `include` are expanded at parse time: the variable's value or
//! the file's contents are parsed in place, sharing the parse stack.

use std::mem;
use std::rc::Rc;

use tracing::{debug, instrument};

use crate::error::{CsError, Location, Result};

use super::escape::EscapeMode;
use super::expr::{parse_expr, Expr, DELIMITERS};
use super::macros::Macro;
use super::session::{Origin, Session, Source};
use super::stmt::{Command, State, Stmt};

/// One open block.
#[derive(Debug)]
pub(crate) struct StackEntry {
    pub state: State,
    /// Escape mode stamped on `var` statements inside this block.
    pub escape: EscapeMode,
    /// Where the block was opened (or where its `else` was seen).
    pub location: Location,
    pub block: Block,
}

/// The construct under construction, with the body collected so far.
#[derive(Debug)]
pub(crate) enum Block {
    Root(Vec<Stmt>),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        elifs: Vec<(Expr, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
    },
    Each { var: String, expr: Expr, body: Vec<Stmt> },
    With { var: String, expr: Expr, body: Vec<Stmt> },
    Def { name: String, body: Vec<Stmt> },
    Loop { var: String, args: Vec<Expr>, body: Vec<Stmt> },
    Alt { expr: Expr, body: Vec<Stmt> },
    Escape { mode: EscapeMode, body: Vec<Stmt> },
}

impl Block {
    /// The statement list new statements are appended to.
    fn body_mut(&mut self) -> &mut Vec<Stmt> {
        match self {
            Block::Root(body)
            | Block::Each { body, .. }
            | Block::With { body, .. }
            | Block::Def { body, .. }
            | Block::Loop { body, .. }
            | Block::Alt { body, .. }
            | Block::Escape { body, .. } => body,
            Block::If { then_body, elifs, else_body, .. } => match (else_body, elifs.last_mut()) {
                (Some(body), _) => body,
                (None, Some((_, body))) => body,
                (None, None) => then_body,
            },
        }
    }
}

impl Session {
    /// Parse template text and append it to this session's tree.
    pub fn parse_str(&mut self, text: &str) -> Result<()> {
        self.parse_source(text, Origin::Anonymous)
    }

    /// Load a template through the file loader and parse it.
    #[instrument(skip(self))]
    pub fn parse_file(&mut self, path: &str) -> Result<()> {
        let text = self.read_template(path)?;
        self.parse_source(&text, Origin::File(path.to_owned()))
    }

    fn parse_source(&mut self, text: &str, origin: Origin) -> Result<()> {
        let saved = mem::replace(&mut self.source, Source { origin, text: Rc::from(text), offset: 0 });
        let depth = self.stack.len();
        let result = self.parse_markers().and_then(|()| self.check_terminated(depth));
        if result.is_err() {
            self.stack.truncate(depth.max(1));
            self.escaping.next_stack = None;
        }
        self.source = saved;
        result
    }

    fn check_terminated(&self, depth: usize) -> Result<()> {
        match self.stack.last() {
            Some(entry) if self.stack.len() > depth => Err(CsError::Parse {
                location: entry.location.clone(),
                message: format!("Non-terminated {} clause", entry.state.name()),
            }),
            _ => Ok(()),
        }
    }

    fn parse_markers(&mut self) -> Result<()> {
        let text = Rc::clone(&self.source.text);
        let mut pos = 0;
        while pos < text.len() {
            let Some(start) = self.find_opener(&text, pos) else {
                self.push_literal(&text[pos..]);
                break;
            };
            self.push_literal(&text[pos..start]);
            self.source.offset = start;

            let mut p = start + 2 + self.tag_len;
            while text.as_bytes().get(p).is_some_and(u8::is_ascii_whitespace) {
                p += 1;
            }
            let Some(len) = text[p..].find("?>") else {
                return Err(self.parse_error(format!("Missing end ?> at {}", first_line(&text[start..]))));
            };
            let directive = &text[p..p + len];
            if directive.contains("<?") {
                return Err(self.parse_error(format!("Missing end ?> at {}", first_line(directive))));
            }
            pos = p + len + 2;
            if !directive.starts_with('#') {
                self.parse_directive(directive)?;
            }
        }
        Ok(())
    }

    /// Offset of the next `<?tag` followed by whitespace.
    fn find_opener(&self, text: &str, from: usize) -> Option<usize> {
        let mut at = from;
        while let Some(m) = self.opener.find(&text[at..]) {
            let start = at + m.start();
            if matches!(text.as_bytes().get(at + m.end()), Some(b' ' | b'\t' | b'\r' | b'\n')) {
                return Some(start);
            }
            at = start + 1;
        }
        None
    }

    fn parse_directive(&mut self, directive: &str) -> Result<()> {
        let Some(command) = Command::lookup(directive) else {
            return Err(self.parse_error(format!("Unknown command {}", directive.trim_end())));
        };
        let state = self.top_state();
        if !command.allowed_in(state) {
            return Err(self.parse_error(format!(
                "Command {} not allowed in {}",
                command.name(),
                state.name()
            )));
        }
        let rest = &directive[command.name().len()..];
        let required = rest.starts_with('!');
        let arg = rest.get(1..).unwrap_or("");

        // Arms only build what the directive contributes; the table decides
        // whether it opens or closes a block.
        let block = match command {
            Command::Name => {
                let name = self.var_name(arg)?;
                self.push_stmt(Stmt::Name(name.to_owned()));
                None
            }
            Command::Var | Command::Uvar => {
                let expr = self.expr(arg, false)?;
                let escape = if command == Command::Uvar { EscapeMode::None } else { self.top_escape() };
                self.push_stmt(Stmt::Var { expr, escape });
                None
            }
            Command::Evar => {
                self.evar(arg, required)?;
                None
            }
            Command::Lvar => {
                let expr = self.expr(arg, false)?;
                self.push_stmt(Stmt::Lvar(expr));
                None
            }
            Command::Linclude => {
                let expr = self.expr(arg, false)?;
                self.push_stmt(Stmt::Linclude { expr, required });
                None
            }
            Command::Include => {
                self.include(arg, required)?;
                None
            }
            Command::If => {
                let cond = self.expr(arg, false)?;
                Some(Block::If { cond, then_body: Vec::new(), elifs: Vec::new(), else_body: None })
            }
            Command::ElseIf | Command::Elif => {
                let cond = self.expr(arg, false)?;
                if let Some(StackEntry { block: Block::If { elifs, .. }, .. }) = self.stack.last_mut() {
                    elifs.push((cond, Vec::new()));
                }
                None
            }
            Command::Else => {
                let location = self.location();
                if let Some(entry) = self.stack.last_mut() {
                    if let Block::If { else_body, .. } = &mut entry.block {
                        *else_body = Some(Vec::new());
                    }
                    entry.state = State::Else;
                    entry.location = location;
                }
                None
            }
            Command::Each | Command::With => {
                let Some((var, rhs)) = split_assignment(arg) else {
                    return Err(self.parse_error(format!(
                        "Improperly formatted {} directive: {arg}",
                        command.name()
                    )));
                };
                let expr = self.expr(rhs, false)?;
                let var = var.to_owned();
                Some(if command == Command::Each {
                    Block::Each { var, expr, body: Vec::new() }
                } else {
                    Block::With { var, expr, body: Vec::new() }
                })
            }
            Command::Loop => Some(self.loop_header(arg)?),
            Command::Def => Some(self.def(arg)?),
            Command::Call => {
                self.call(arg)?;
                None
            }
            Command::Set => {
                let Some((lhs, rhs)) = arg.split_once('=') else {
                    return Err(self.parse_error(format!("Missing equals in set {arg}")));
                };
                let target = self.expr(lhs, true)?;
                let value = self.expr(rhs, false)?;
                self.push_stmt(Stmt::Set { target, value });
                None
            }
            Command::Alt => {
                let expr = self.expr(arg, false)?;
                Some(Block::Alt { expr, body: Vec::new() })
            }
            Command::Escape => {
                let expr = self.expr(arg, false)?;
                let Expr::Str(name) = &expr else {
                    return Err(self.parse_error(format!("Invalid argument for escape: {arg}")));
                };
                let Some(mode) = EscapeMode::from_directive(name) else {
                    return Err(self.parse_error(format!("Invalid argument for escape: {}", name.trim())));
                };
                self.escaping.next_stack = Some(mode);
                Some(Block::Escape { mode, body: Vec::new() })
            }
            Command::EndIf
            | Command::EndEach
            | Command::EndWith
            | Command::EndDef
            | Command::EndLoop
            | Command::EndAlt
            | Command::EndEscape => None,
        };

        match (command.opens(), block) {
            (Some(state), Some(block)) => self.open(state, block),
            (None, None) => {}
            _ => {
                self.escaping.next_stack = None;
                return Err(CsError::Assert(format!("no block state for command {}", command.name())));
            }
        }
        if command.closes() {
            self.close()?;
        }
        Ok(())
    }

    // ── Stack helpers ─────────────────────────────────────────────────────────

    fn top_state(&self) -> State {
        self.stack.last().map_or(State::Global, |e| e.state)
    }

    fn top_escape(&self) -> EscapeMode {
        self.stack.last().map_or(self.escaping.global, |e| e.escape)
    }

    fn push_stmt(&mut self, stmt: Stmt) {
        if let Some(entry) = self.stack.last_mut() {
            entry.block.body_mut().push(stmt);
        }
    }

    fn push_literal(&mut self, text: &str) {
        if !text.is_empty() {
            self.push_stmt(Stmt::Literal(text.to_owned()));
        }
    }

    /// Push a block.  It takes the escape mode requested by the directive
    /// that opened it, or inherits the enclosing block's.
    fn open(&mut self, state: State, block: Block) {
        let escape = self.escaping.next_stack.take().unwrap_or_else(|| self.top_escape());
        let location = self.location();
        self.stack.push(StackEntry { state, escape, location, block });
    }

    fn close(&mut self) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(CsError::Assert("attempt to close the top-level block".into()));
        }
        let Some(entry) = self.stack.pop() else { return Ok(()) };
        let stmt = match entry.block {
            Block::Root(_) => return Err(CsError::Assert("nested top-level block".into())),
            Block::Def { name, body } => {
                self.macros.set_body(&name, body);
                return Ok(());
            }
            Block::If { cond, then_body, elifs, else_body } => {
                let mut tail = else_body.unwrap_or_default();
                for (cond, body) in elifs.into_iter().rev() {
                    tail = vec![Stmt::If { cond, then_block: body, else_block: tail }];
                }
                Stmt::If { cond, then_block: then_body, else_block: tail }
            }
            Block::Each { var, expr, body } => Stmt::Each { var, expr, body },
            Block::With { var, expr, body } => Stmt::With { var, expr, body },
            Block::Loop { var, args, body } => Stmt::Loop { var, args, body },
            Block::Alt { expr, body } => Stmt::Alt { expr, body },
            Block::Escape { mode, body } => Stmt::Escape { mode, body },
        };
        self.push_stmt(stmt);
        Ok(())
    }

    // ── Argument parsing ──────────────────────────────────────────────────────

    fn expr(&self, src: &str, lvalue: bool) -> Result<Expr> {
        parse_expr(src, lvalue, &self.functions).map_err(|message| self.parse_error(message))
    }

    /// A bare variable name for `name:` and `evar:`.
    fn var_name<'a>(&self, arg: &'a str) -> Result<&'a str> {
        let name = arg.trim();
        match name.chars().find(|c| matches!(c, '#' | '"' | ' ' | '<' | '>')) {
            Some(c) => Err(self.parse_error(format!("Invalid character in var name {name}: {c}"))),
            None => Ok(name),
        }
    }

    fn evar(&mut self, arg: &str, required: bool) -> Result<()> {
        let name = self.var_name(arg)?;
        let value = self.store.borrow().get_copy(name);
        match value {
            Some(text) => self.parse_source(&text, Origin::Named(name.to_owned())),
            None if required => Err(self.not_found(format!("Unable to evar empty variable {name}"))),
            None => Ok(()),
        }
    }

    fn include(&mut self, arg: &str, required: bool) -> Result<()> {
        let expr = self.expr(arg, false)?;
        let value = self.eval(&expr)?;
        let Some(path) = self.value_str(&value) else {
            if required {
                return Err(self.not_found(format!("Unable to include empty path {}", arg.trim())));
            }
            return Ok(());
        };
        match self.parse_file(&path) {
            Err(e) if !required && e.is_not_found() => {
                debug!(path = %path, "optional include not found");
                Ok(())
            }
            Err(CsError::FileNotFound(file)) => Err(self.not_found(format!("Unable to include file {file}"))),
            other => other,
        }
    }

    fn loop_header(&self, arg: &str) -> Result<Block> {
        let Some((var, rhs)) = split_assignment(arg) else {
            return Err(self.parse_error(format!("Improperly formatted loop directive: {arg}")));
        };
        let args = rhs
            .split(',')
            .map(|part| self.expr(part, false))
            .collect::<Result<Vec<_>>>()?;
        if !(1..=3).contains(&args.len()) {
            return Err(self.parse_error(format!(
                "Incorrect number of arguments, expected 1, 2, or 3 got {} in loop: {arg}",
                args.len()
            )));
        }
        Ok(Block::Loop { var: var.to_owned(), args, body: Vec::new() })
    }

    /// `def:name(a, b)`.  The macro is registered here so its body may call it.
    fn def(&mut self, arg: &str) -> Result<Block> {
        let (name, rest) = split_macro_name(arg);
        let Some(params_src) = rest.strip_prefix('(') else {
            return Err(self.parse_error(format!("Missing left paren in macro def {arg}")));
        };
        if self.macros.contains(name) {
            return Err(self.parse_error(format!("Duplicate macro def for {arg}")));
        }
        let params = self.def_params(params_src, arg)?;
        self.macros.define(Macro::new(name, params));
        self.escaping.next_stack = Some(EscapeMode::Undef);
        Ok(Block::Def { name: name.to_owned(), body: Vec::new() })
    }

    fn def_params(&self, src: &str, arg: &str) -> Result<Vec<String>> {
        let mut params = Vec::new();
        let mut s = src;
        while !s.is_empty() {
            s = s.trim_start();
            let Some(end) = s.find([',', ')']) else {
                return Err(self.parse_error(format!("Missing right paren in def {arg}")));
            };
            let last = s.as_bytes()[end] == b')';
            let piece = s[..end].split([' ', '\t', '\r', '\n']).next().unwrap_or("");
            if let Some(c) = piece.chars().find(|c| c.is_ascii() && DELIMITERS.contains(&(*c as u8))) {
                return Err(self.parse_error(format!("Invalid character in def {arg} argument: {c}")));
            }
            if piece.is_empty() {
                if params.is_empty() {
                    break;
                }
                return Err(self.parse_error(format!("Missing argument name or extra comma in def {arg}")));
            }
            params.push(piece.to_owned());
            if last {
                break;
            }
            s = &s[end + 1..];
        }
        Ok(params)
    }

    /// `call:name(args)`.  Arity is checked against the macro's definition.
    fn call(&mut self, arg: &str) -> Result<()> {
        let (name, rest) = split_macro_name(arg);
        let Some(rest) = rest.strip_prefix('(') else {
            return Err(self.parse_error(format!("Missing left paren in call {arg}")));
        };
        let Some(mac) = self.macros.get(name) else {
            return Err(self.parse_error(format!("Undefined macro called: {arg}")));
        };
        let Some(close) = rest.rfind(')') else {
            return Err(self.parse_error(format!("Missing right paren in call {arg}")));
        };
        let inner = rest[..close].trim_start();
        let args = if inner.is_empty() { Vec::new() } else { self.expr(inner, false)?.into_args() };
        if args.len() != mac.arity() {
            return Err(self.parse_error(format!(
                "Incorrect number of arguments, expected {}, got {} in call to macro {}: {arg}",
                mac.arity(),
                args.len(),
                mac.name
            )));
        }
        let escape = self.top_escape();
        self.push_stmt(Stmt::Call { name: name.to_owned(), args, escape });
        Ok(())
    }
}

/// `var = expr` → `("var", "expr")`.  Text between the name and `=` is ignored.
fn split_assignment(arg: &str) -> Option<(&str, &str)> {
    let s = arg.trim();
    let name_end = s.find(|c: char| c.is_ascii_whitespace() || c == '=')?;
    let name = &s[..name_end];
    let after = &s[name_end..];
    let eq = after.find('=')?;
    let rhs = after[eq + 1..].trim_start();
    (!name.is_empty() && !rhs.is_empty()).then_some((name, rhs))
}

/// Macro name up to a space, `#` or `(`; the rest with leading space removed.
fn split_macro_name(arg: &str) -> (&str, &str) {
    let end = arg.find([' ', '#', '(']).unwrap_or(arg.len());
    (&arg[..end], arg[end..].trim_start())
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdf::Hdf;

    fn session() -> Session {
        Session::new(Hdf::new().into_shared()).unwrap()
    }

    fn parse(src: &str) -> Session {
        let mut s = session();
        s.parse_str(src).unwrap();
        s
    }

    fn parse_err(src: &str) -> String {
        session().parse_str(src).unwrap_err().to_string()
    }

    #[test]
    fn literal_text_only() {
        let s = parse("plain text");
        assert_eq!(s.tree(), &[Stmt::Literal("plain text".into())]);
    }

    #[test]
    fn marker_requires_whitespace_after_tag() {
        let s = parse("<?csx var:a ?>");
        assert_eq!(s.tree(), &[Stmt::Literal("<?csx var:a ?>".into())]);
    }

    #[test]
    fn marker_tag_is_case_insensitive() {
        let s = parse("a<?CS var:x ?>b");
        assert_eq!(s.tree().len(), 3);
        assert!(matches!(s.tree()[1], Stmt::Var { .. }));
    }

    #[test]
    fn comments_produce_nothing() {
        let s = parse("a<?cs # note ?>b");
        assert_eq!(s.tree(), &[Stmt::Literal("a".into()), Stmt::Literal("b".into())]);
    }

    #[test]
    fn var_takes_block_escape() {
        let s = parse("<?cs escape:\"html\" ?><?cs var:x ?><?cs uvar:y ?><?cs /escape ?>");
        let Stmt::Escape { mode, body } = &s.tree()[0] else { panic!("expected escape") };
        assert_eq!(*mode, EscapeMode::Html);
        assert!(matches!(body[0], Stmt::Var { escape: EscapeMode::Html, .. }));
        assert!(matches!(body[1], Stmt::Var { escape: EscapeMode::None, .. }));
    }

    #[test]
    fn nested_blocks_inherit_escape() {
        let s = parse("<?cs escape:\"js\" ?><?cs if:1 ?><?cs var:x ?><?cs else ?><?cs var:y ?><?cs /if ?><?cs /escape ?>");
        let Stmt::Escape { body, .. } = &s.tree()[0] else { panic!() };
        let Stmt::If { then_block, else_block, .. } = &body[0] else { panic!() };
        assert!(matches!(then_block[0], Stmt::Var { escape: EscapeMode::Script, .. }));
        assert!(matches!(else_block[0], Stmt::Var { escape: EscapeMode::Script, .. }));
    }

    #[test]
    fn def_body_is_undef_escaped() {
        let s = parse("<?cs def:m(a) ?><?cs var:a ?><?cs /def ?>");
        let m = s.macros().get("m").unwrap();
        assert_eq!(m.params, vec!["a".to_string()]);
        assert!(matches!(m.body[0], Stmt::Var { escape: EscapeMode::Undef, .. }));
        assert!(s.tree().is_empty());
    }

    #[test]
    fn elif_chain_nests_in_else() {
        let s = parse("<?cs if:a ?>A<?cs elif:b ?>B<?cs elseif:c ?>C<?cs else ?>D<?cs /if ?>");
        let Stmt::If { then_block, else_block, .. } = &s.tree()[0] else { panic!() };
        assert_eq!(then_block, &[Stmt::Literal("A".into())]);
        let Stmt::If { then_block, else_block, .. } = &else_block[0] else { panic!() };
        assert_eq!(then_block, &[Stmt::Literal("B".into())]);
        let Stmt::If { then_block, else_block, .. } = &else_block[0] else { panic!() };
        assert_eq!(then_block, &[Stmt::Literal("C".into())]);
        assert_eq!(else_block, &[Stmt::Literal("D".into())]);
    }

    #[test]
    fn unknown_and_misplaced_commands() {
        assert_eq!(parse_err("<?cs bogus ?>"), "[lineno:~1] Unknown command bogus");
        assert_eq!(parse_err("\n<?cs /each ?>"), "[lineno:~2] Command /each not allowed in GLOBAL");
        assert_eq!(
            parse_err("<?cs if:1 ?><?cs else ?><?cs elif:2 ?>"),
            "[lineno:~1] Command elif not allowed in ELSE"
        );
    }

    #[test]
    fn unterminated_blocks() {
        assert_eq!(parse_err("<?cs if:1 ?>\n\n"), "[lineno:~1] Non-terminated IF clause");
        assert_eq!(parse_err("<?cs if:1 ?>\n<?cs else ?>"), "[lineno:~2] Non-terminated ELSE clause");
        assert_eq!(parse_err("<?cs each:x = y ?>"), "[lineno:~1] Non-terminated EACH clause");
        assert_eq!(parse_err("<?cs with:w = N ?>u"), "[lineno:~1] Non-terminated WITH clause");
        assert_eq!(parse_err("<?cs def:m() ?>u"), "[lineno:~1] Non-terminated DEF clause");
        assert_eq!(parse_err("<?cs loop:i = 1, 3 ?>u"), "[lineno:~1] Non-terminated LOOP clause");
        assert_eq!(parse_err("<?cs alt:N ?>u"), "[lineno:~1] Non-terminated ALT clause");
        assert_eq!(parse_err("<?cs escape:\"html\" ?>u"), "[lineno:~1] Non-terminated ESCAPE clause");
    }

    #[test]
    fn block_commands_push_and_pop_by_table() {
        let openers = [
            ("if:1", "/if"),
            ("each:x = L", "/each"),
            ("with:x = L", "/with"),
            ("def:blk()", "/def"),
            ("loop:i = 2", "/loop"),
            ("alt:x", "/alt"),
            ("escape:\"url\"", "/escape"),
        ];
        for (open, close) in openers {
            let mut s = session();
            let opens = Command::lookup(open).and_then(Command::opens).unwrap();
            s.parse_directive(open).unwrap();
            assert_eq!(s.stack.len(), 2);
            assert_eq!(s.top_state(), opens);
            s.parse_directive(close).unwrap();
            assert_eq!(s.stack.len(), 1, "{close} did not pop");
        }
    }

    #[test]
    fn missing_end_marker() {
        assert!(parse_err("<?cs var:x").contains("Missing end ?>"));
        assert!(parse_err("<?cs var:x <?cs var:y ?>").contains("Missing end ?>"));
    }

    #[test]
    fn each_and_loop_headers() {
        let s = parse("<?cs each:item = list ?>x<?cs /each ?><?cs loop:i = 1, 5, 2 ?>y<?cs /loop ?>");
        assert!(matches!(&s.tree()[0], Stmt::Each { var, .. } if var == "item"));
        assert!(matches!(&s.tree()[1], Stmt::Loop { args, .. } if args.len() == 3));
        assert!(parse_err("<?cs each:item ?>").contains("Improperly formatted each directive"));
        assert!(parse_err("<?cs with:x = ?>").contains("Improperly formatted with directive"));
        assert!(parse_err("<?cs loop:i = 1,2,3,4 ?>")
            .contains("Incorrect number of arguments, expected 1, 2, or 3 got 4 in loop"));
    }

    #[test]
    fn def_errors() {
        assert!(parse_err("<?cs def:m ?>").contains("Missing left paren in macro def"));
        assert!(parse_err("<?cs def:m(a ?>").contains("Missing right paren in def"));
        assert!(parse_err("<?cs def:m(a-b) ?>").contains("Invalid character in def m(a-b) argument: -"));
        assert!(parse_err("<?cs def:m(a,) ?>").contains("Missing argument name or extra comma"));
        assert!(parse_err("<?cs def:m() ?><?cs /def ?><?cs def:m() ?>").contains("Duplicate macro def"));
    }

    #[test]
    fn call_errors() {
        let defs = "<?cs def:m(a, b) ?><?cs /def ?>";
        assert!(parse_err("<?cs call:nope() ?>").contains("Undefined macro called"));
        assert!(parse_err(&format!("{defs}<?cs call:m ?>")).contains("Missing left paren in call"));
        assert!(parse_err(&format!("{defs}<?cs call:m(1 ?>")).contains("Missing right paren in call"));
        assert!(parse_err(&format!("{defs}<?cs call:m(1) ?>"))
            .contains("Incorrect number of arguments, expected 2, got 1 in call to macro m"));
    }

    #[test]
    fn call_with_wrong_arity_leaves_no_statement() {
        let mut s = session();
        let err = s.parse_str("<?cs def:m(p) ?>x<?cs /def ?>before<?cs call:m(1, 2) ?>").unwrap_err();
        assert!(err.to_string().contains("Incorrect number of arguments, expected 1, got 2"));
        assert!(!s.tree().iter().any(|stmt| matches!(stmt, Stmt::Call { .. })));
    }

    #[test]
    fn recursive_macro_parses() {
        let s = parse("<?cs def:r(n) ?><?cs if:n > 0 ?><?cs call:r(n - 1) ?><?cs /if ?><?cs /def ?>");
        assert!(s.macros().contains("r"));
    }

    #[test]
    fn set_and_escape_errors() {
        assert!(parse_err("<?cs set:x ?>").contains("Missing equals in set"));
        assert!(parse_err("<?cs set:x + 1 = 2 ?>").contains("Invalid op '+' in lvalue"));
        assert!(parse_err("<?cs escape:html ?>").contains("Invalid argument for escape"));
        assert!(parse_err("<?cs escape:\"xml\" ?>").contains("Invalid argument for escape: xml"));
    }

    #[test]
    fn name_rejects_bad_characters() {
        assert!(parse_err("<?cs name:a<b ?>").contains("Invalid character in var name"));
        let s = parse("<?cs name: Page.Title ?>");
        assert_eq!(s.tree(), &[Stmt::Name("Page.Title".into())]);
    }

    #[test]
    fn evar_parses_value_inline() {
        let mut hdf = Hdf::new();
        hdf.set("Snippet", "<?cs var:x ?>");
        let mut s = Session::new(hdf.into_shared()).unwrap();
        s.parse_str("<?cs evar:Snippet ?><?cs evar:Missing ?>").unwrap();
        assert_eq!(s.tree().len(), 1);
        let err = s.parse_str("<?cs evar!Missing ?>").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn evar_errors_name_the_variable() {
        let mut hdf = Hdf::new();
        hdf.set("Bad", "\n<?cs bogus ?>");
        let mut s = Session::new(hdf.into_shared()).unwrap();
        let err = s.parse_str("<?cs evar:Bad ?>").unwrap_err();
        assert_eq!(err.to_string(), "[Bad:~2] Unknown command bogus");
    }

    #[test]
    fn optional_include_of_missing_file_is_noop() {
        let mut s = session();
        s.parse_str("a<?cs include:\"no/such/file.cs\" ?>b").unwrap();
        assert_eq!(s.tree().len(), 2);
        let err = s.parse_str("<?cs include!\"no/such/file.cs\" ?>").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn failed_parse_leaves_stack_balanced() {
        let mut s = session();
        assert!(s.parse_str("<?cs if:1 ?><?cs bogus ?>").is_err());
        s.parse_str("<?cs var:x ?>").unwrap();
        assert_eq!(s.tree().len(), 1);
    }

    #[test]
    fn custom_tag() {
        let mut hdf = Hdf::new();
        hdf.set("Config.TagStart", "tpl");
        let mut s = Session::new(hdf.into_shared()).unwrap();
        s.parse_str("<?cs var:x ?><?tpl var:x ?>").unwrap();
        assert_eq!(s.tree().len(), 2);
        assert!(matches!(s.tree()[0], Stmt::Literal(_)));
    }

    #[test]
    fn split_assignment_forms() {
        assert_eq!(split_assignment("x = a.b"), Some(("x", "a.b")));
        assert_eq!(split_assignment("x=a"), Some(("x", "a")));
        assert_eq!(split_assignment("x a"), None);
        assert_eq!(split_assignment("x ="), None);
    }
}
