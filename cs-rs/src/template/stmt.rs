//! Statement tree and the directive command table.

use super::escape::EscapeMode;
use super::expr::Expr;

/// A parsed template statement.  Bodies are owned in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Text outside any marker.
    Literal(String),
    /// `name:var`: the last segment of the node's name.
    Name(String),
    /// `var:expr` / `uvar:expr`.  `uvar` carries `EscapeMode::None`.
    Var { expr: Expr, escape: EscapeMode },
    /// `lvar:expr`: the value is parsed and rendered as a template.
    Lvar(Expr),
    /// `linclude:expr`: the named file is parsed and rendered at render time.
    Linclude { expr: Expr, required: bool },
    /// `if:` … `elif:` … `else` … `/if`.  `elif` arms nest in `else_block`.
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_block: Vec<Stmt>,
    },
    /// `each:var = expr`: iterate over the children of a node.
    Each { var: String, expr: Expr, body: Vec<Stmt> },
    /// `with:var = expr`: alias a node.
    With { var: String, expr: Expr, body: Vec<Stmt> },
    /// `loop:var = start, end, step` with one to three arguments.
    Loop { var: String, args: Vec<Expr>, body: Vec<Stmt> },
    /// `call:name(args)`.  The macro is resolved by name at render time.
    Call { name: String, args: Vec<Expr>, escape: EscapeMode },
    /// `set:lvalue = expr`
    Set { target: Expr, value: Expr },
    /// `alt:expr` … `/alt`: the value if true, else the body.
    Alt { expr: Expr, body: Vec<Stmt> },
    /// `escape:"mode"` … `/escape`.  The mode is baked into nested `var`s.
    Escape { mode: EscapeMode, body: Vec<Stmt> },
}

// ── Parser states ─────────────────────────────────────────────────────────────

/// Nesting state of a parse stack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Global,
    If,
    Else,
    Each,
    With,
    Def,
    Loop,
    Alt,
    Escape,
}

impl State {
    pub fn name(self) -> &'static str {
        match self {
            State::Global => "GLOBAL",
            State::If => "IF",
            State::Else => "ELSE",
            State::Each => "EACH",
            State::With => "WITH",
            State::Def => "DEF",
            State::Loop => "LOOP",
            State::Alt => "ALT",
            State::Escape => "ESCAPE",
        }
    }
}

// ── Command table ─────────────────────────────────────────────────────────────

/// Every directive the parser understands, in match order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Name,
    Var,
    Uvar,
    Evar,
    Lvar,
    If,
    Else,
    ElseIf,
    Elif,
    EndIf,
    Each,
    EndEach,
    With,
    EndWith,
    Include,
    Linclude,
    Def,
    EndDef,
    Call,
    Set,
    Loop,
    EndLoop,
    Alt,
    EndAlt,
    Escape,
    EndEscape,
}

impl Command {
    pub const ALL: [Command; 26] = [
        Command::Name,
        Command::Var,
        Command::Uvar,
        Command::Evar,
        Command::Lvar,
        Command::If,
        Command::Else,
        Command::ElseIf,
        Command::Elif,
        Command::EndIf,
        Command::Each,
        Command::EndEach,
        Command::With,
        Command::EndWith,
        Command::Include,
        Command::Linclude,
        Command::Def,
        Command::EndDef,
        Command::Call,
        Command::Set,
        Command::Loop,
        Command::EndLoop,
        Command::Alt,
        Command::EndAlt,
        Command::Escape,
        Command::EndEscape,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Name => "name",
            Command::Var => "var",
            Command::Uvar => "uvar",
            Command::Evar => "evar",
            Command::Lvar => "lvar",
            Command::If => "if",
            Command::Else => "else",
            Command::ElseIf => "elseif",
            Command::Elif => "elif",
            Command::EndIf => "/if",
            Command::Each => "each",
            Command::EndEach => "/each",
            Command::With => "with",
            Command::EndWith => "/with",
            Command::Include => "include",
            Command::Linclude => "linclude",
            Command::Def => "def",
            Command::EndDef => "/def",
            Command::Call => "call",
            Command::Set => "set",
            Command::Loop => "loop",
            Command::EndLoop => "/loop",
            Command::Alt => "alt",
            Command::EndAlt => "/alt",
            Command::Escape => "escape",
            Command::EndEscape => "/escape",
        }
    }

    pub fn has_arg(self) -> bool {
        !matches!(
            self,
            Command::Else
                | Command::EndIf
                | Command::EndEach
                | Command::EndWith
                | Command::EndDef
                | Command::EndLoop
                | Command::EndAlt
                | Command::EndEscape
        )
    }

    pub fn allowed_in(self, state: State) -> bool {
        match self {
            Command::Else | Command::ElseIf | Command::Elif => state == State::If,
            Command::EndIf => matches!(state, State::If | State::Else),
            Command::EndEach => state == State::Each,
            Command::EndWith => state == State::With,
            Command::EndDef => state == State::Def,
            Command::EndLoop => state == State::Loop,
            Command::EndAlt => state == State::Alt,
            Command::EndEscape => state == State::Escape,
            _ => true,
        }
    }

    /// The state a command opens, if it starts a block.
    pub fn opens(self) -> Option<State> {
        Some(match self {
            Command::If => State::If,
            Command::Each => State::Each,
            Command::With => State::With,
            Command::Def => State::Def,
            Command::Loop => State::Loop,
            Command::Alt => State::Alt,
            Command::Escape => State::Escape,
            _ => return None,
        })
    }

    pub fn closes(self) -> bool {
        self.name().starts_with('/')
    }

    /// Match the start of `directive` against the table.  A match needs the
    /// full command name (any case) followed by `:`/`!` for commands taking
    /// an argument, or by a space, a line break or the end of the directive.
    pub fn lookup(directive: &str) -> Option<Command> {
        let bytes = directive.as_bytes();
        Command::ALL.into_iter().find(|cmd| {
            let name = cmd.name().as_bytes();
            let n = name.len();
            bytes.len() >= n
                && bytes[..n].eq_ignore_ascii_case(name)
                && match bytes.get(n) {
                    None | Some(b' ' | b'\r' | b'\n') => true,
                    Some(b':' | b'!') => cmd.has_arg(),
                    _ => false,
                }
        })
    }
}
