//! Function registry and the typed argument builder.
//!
//! A function is a named handler with a fixed arity.  Handlers receive the
//! unevaluated argument expressions and decide how to evaluate them; most go
//! through [`FromArgs`], which evaluates each argument and converts it to the
//! Rust type the closure asks for:
//!
//! ```ignore
//! session.register_function("max", |_, (a, b): (i64, i64)| Ok(a.max(b)))?;
//! ```
//!
//! The arity is taken from the tuple type, so a call with the wrong number of
//! arguments is rejected when the template is parsed.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{CsError, Result};

use super::expr::Expr;
use super::session::Session;
use super::value::Value;

/// Raw handler: receives the session and the unevaluated argument list.
pub type Handler = Rc<dyn Fn(&mut Session, &[Expr]) -> Result<Value>>;

/// A registered function.
pub struct Function {
    pub name: String,
    pub arity: usize,
    /// The result is already escaped; `var` must not escape it again.
    pub escapes: bool,
    handler: Handler,
}

impl Function {
    /// A function with a raw handler.
    pub fn new(name: impl Into<String>, arity: usize, handler: Handler) -> Self {
        Function { name: name.into(), arity, escapes: false, handler }
    }

    /// A function whose arguments are built from `A`.
    pub fn typed<A, R, F>(name: impl Into<String>, f: F) -> Self
    where
        A: FromArgs,
        R: Into<Value>,
        F: Fn(&Session, A) -> Result<R> + 'static,
    {
        let handler: Handler = Rc::new(move |session, args| {
            let built = A::from_args(session, args)?;
            f(session, built).map(Into::into)
        });
        Function::new(name, A::ARITY, handler)
    }

    /// A one-argument string transform.  Strings and variables are resolved
    /// and passed through `f`; numbers are returned unchanged.
    pub fn string<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> String + 'static,
    {
        Function::typed(name, move |session, (value,): (Value,)| {
            Ok(match value {
                Value::Num(_) | Value::VarNum(_) => value,
                other => Value::from(session.value_str(&other).map(|s| f(&s))),
            })
        })
    }

    /// Mark the result as already escaped.
    pub fn escaping(mut self) -> Self {
        self.escapes = true;
        self
    }

    pub fn call(&self, session: &mut Session, args: &[Expr]) -> Result<Value> {
        (self.handler)(session, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("escapes", &self.escapes)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.arity == other.arity && self.escapes == other.escapes
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Name → function map shared by a session and its children.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    map: HashMap<String, Rc<Function>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `function`; a second function with the same name is rejected.
    pub fn register(&mut self, function: Function) -> Result<()> {
        if self.map.contains_key(&function.name) {
            return Err(CsError::Duplicate(function.name));
        }
        self.map.insert(function.name.clone(), Rc::new(function));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Rc<Function>> {
        self.map.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ── Typed argument builder ────────────────────────────────────────────────────

/// Conversion from one evaluated argument.
pub trait FromArg: Sized {
    fn from_arg(session: &mut Session, expr: &Expr) -> Result<Self>;
}

/// Numeric coercion: strings parse their integer prefix, variables are looked up.
impl FromArg for i64 {
    fn from_arg(session: &mut Session, expr: &Expr) -> Result<Self> {
        let value = session.eval(expr)?;
        Ok(session.value_num(&value))
    }
}

/// Text of the argument; numbers are rendered in decimal, missing values are `None`.
impl FromArg for Option<String> {
    fn from_arg(session: &mut Session, expr: &Expr) -> Result<Self> {
        let value = session.eval(expr)?;
        Ok(session.value_text(&value))
    }
}

/// Like `Option<String>` with missing values read as empty.
impl FromArg for String {
    fn from_arg(session: &mut Session, expr: &Expr) -> Result<Self> {
        Option::<String>::from_arg(session, expr).map(Option::unwrap_or_default)
    }
}

/// The evaluated value as-is, for functions that inspect variable names.
impl FromArg for Value {
    fn from_arg(session: &mut Session, expr: &Expr) -> Result<Self> {
        session.eval(expr)
    }
}

/// A fixed-size tuple of [`FromArg`] values.
pub trait FromArgs: Sized {
    const ARITY: usize;
    fn from_args(session: &mut Session, args: &[Expr]) -> Result<Self>;
}

impl FromArgs for () {
    const ARITY: usize = 0;
    fn from_args(_: &mut Session, _: &[Expr]) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_from_args {
    ($n:expr; $($t:ident $i:tt),+) => {
        impl<$($t: FromArg),+> FromArgs for ($($t,)+) {
            const ARITY: usize = $n;
            fn from_args(session: &mut Session, args: &[Expr]) -> Result<Self> {
                if args.len() != $n {
                    return Err(CsError::Assert(format!(
                        "expected {} arguments, got {}", $n, args.len()
                    )));
                }
                Ok(($($t::from_arg(session, &args[$i])?,)+))
            }
        }
    };
}

impl_from_args!(1; A 0);
impl_from_args!(2; A 0, B 1);
impl_from_args!(3; A 0, B 1, C 2);
impl_from_args!(4; A 0, B 1, C 2, D 3);

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_comes_from_tuple_type() {
        let f = Function::typed("pair", |_, (a, b): (i64, i64)| Ok(a + b));
        assert_eq!(f.arity, 2);
        let g = Function::typed("nothing", |_, (): ()| Ok(0));
        assert_eq!(g.arity, 0);
        let h = Function::string("upper", |s| s.to_uppercase());
        assert_eq!(h.arity, 1);
        assert!(!h.escapes);
        assert!(h.escaping().escapes);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut table = FunctionTable::new();
        table.register(Function::typed("f", |_, (a,): (i64,)| Ok(a))).unwrap();
        let err = table.register(Function::typed("f", |_, (a,): (i64,)| Ok(a))).unwrap_err();
        assert!(matches!(err, CsError::Duplicate(ref n) if n == "f"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn lookup_by_name() {
        let mut table = FunctionTable::new();
        table.register(Function::string("id", str::to_owned)).unwrap();
        assert!(table.contains("id"));
        assert_eq!(table.get("id").unwrap().name, "id");
        assert!(table.get("missing").is_none());
    }
}
