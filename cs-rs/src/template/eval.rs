//! Expression evaluation and name resolution.
//!
//! Names resolve through the scope stack first: the first dotted segment is
//! matched against the local bindings, and a node binding resolves the rest
//! of the name below its node.  Anything not bound locally is read from the
//! primary store and then from the global store.

use std::cmp::Ordering;

use tracing::warn;

use crate::error::Result;
use crate::hdf::SharedStore;

use super::expr::{BinOp, Expr, UnaryOp};
use super::scope::{split_first, Bound, NodeRef};
use super::session::Session;
use super::value::{atoi, parse_whole, strtol, Value};

impl Session {
    /// Evaluate an expression in the current scope.
    pub fn eval(&mut self, expr: &Expr) -> Result<Value> {
        Ok(match expr {
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Num(n) => Value::Num(*n),
            Expr::Var(name) => Value::Var(name.clone()),
            Expr::VarNum(name) => Value::VarNum(name.clone()),
            Expr::Paren(inner) => self.eval(inner)?,
            Expr::Call { function, args } => {
                let value = function.call(self, args)?;
                if function.escapes {
                    self.escaping.explicit = true;
                }
                value
            }
            Expr::Unary(UnaryOp::Not, inner) => {
                let value = self.eval(inner)?;
                Value::Num(i64::from(!self.value_bool(&value)))
            }
            Expr::Unary(UnaryOp::Exists, inner) => {
                let value = self.eval(inner)?;
                let exists = match value.var_name() {
                    Some(name) => self.lookup(name).is_some(),
                    None => true,
                };
                Value::Num(i64::from(exists))
            }
            Expr::Comma(items) => {
                let mut last = Value::Null;
                for item in items {
                    last = self.eval(item)?;
                }
                last
            }
            Expr::Binary(op, left, right) => self.binary(*op, left, right)?,
        })
    }

    fn binary(&mut self, op: BinOp, left: &Expr, right: &Expr) -> Result<Value> {
        let l = self.eval(left)?;
        let r = self.eval(right)?;
        Ok(match op {
            BinOp::Dot | BinOp::Bracket => {
                let segment = match (op, &r) {
                    (BinOp::Dot, Value::Var(name) | Value::VarNum(name)) => Some(name.clone()),
                    (_, Value::Num(_) | Value::VarNum(_)) => Some(self.value_num(&r).to_string()),
                    _ => self.value_str(&r).filter(|s| !s.is_empty()),
                };
                match segment {
                    Some(seg) => Value::Var(format!("{}.{seg}", base_name(&l))),
                    None => Value::Var(String::new()),
                }
            }
            BinOp::And => Value::Num(i64::from(self.value_bool(&l) & self.value_bool(&r))),
            BinOp::Or => Value::Num(i64::from(self.value_bool(&l) | self.value_bool(&r))),
            _ if l.is_numeric() || r.is_numeric() || forces_numeric(op) => {
                let (a, b) = (self.value_num(&l), self.value_num(&r));
                numeric(op, a, b)
            }
            _ => {
                let (a, b) = (self.value_str(&l), self.value_str(&r));
                string(op, a, b)
            }
        })
    }

    // ── Conversions ───────────────────────────────────────────────────────────

    /// Text of a string or variable; `None` for numbers and absent values.
    pub fn value_str(&self, value: &Value) -> Option<String> {
        match value {
            Value::Str(s) => Some(s.clone()),
            Value::Var(name) => self.lookup(name),
            Value::Null => None,
            Value::Num(_) | Value::VarNum(_) => {
                warn!(kind = value.kind(), "numeric value used as a string");
                None
            }
        }
    }

    /// Text of any value; numbers are rendered in decimal.
    pub fn value_text(&self, value: &Value) -> Option<String> {
        match value {
            Value::Num(_) | Value::VarNum(_) => Some(self.value_num(value).to_string()),
            _ => self.value_str(value),
        }
    }

    /// Numeric coercion: strings read their integer prefix, variables are
    /// looked up and read as decimal.
    pub fn value_num(&self, value: &Value) -> i64 {
        match value {
            Value::Str(s) => strtol(s).0,
            Value::Num(n) => *n,
            Value::Var(name) | Value::VarNum(name) => self.lookup(name).map_or(0, |s| atoi(&s)),
            Value::Null => 0,
        }
    }

    /// Truthiness.  Absent or empty text is false, wholly numeric text is its
    /// number, any other text is true.
    pub fn value_bool(&self, value: &Value) -> bool {
        match value {
            Value::Str(_) | Value::Var(_) => match self.value_str(value) {
                None => false,
                Some(s) if s.is_empty() => false,
                Some(s) => parse_whole(&s).map_or(true, |n| n != 0),
            },
            Value::Num(n) => *n != 0,
            Value::VarNum(_) => self.value_num(value) != 0,
            Value::Null => false,
        }
    }

    // ── Name resolution ───────────────────────────────────────────────────────

    /// The value bound to or stored under `name`.
    pub fn lookup(&self, name: &str) -> Option<String> {
        let (head, rest) = split_first(name);
        match self.scope.find(head).map(|b| &b.value) {
            Some(Bound::Node { node: Some(node), .. }) => {
                let store = self.store_for(*node).borrow();
                let id = match rest {
                    Some(rest) => store.get_node(node.id, rest)?,
                    None => node.id,
                };
                store.value(id).map(str::to_owned)
            }
            Some(Bound::Node { node: None, path }) => self.stored_value(&join(path, rest)),
            Some(Bound::Str(s)) => s.clone(),
            Some(Bound::Num(n)) => Some(n.to_string()),
            None => self.stored_value(name),
        }
    }

    /// The store node `name` refers to.
    pub fn lookup_node(&self, name: &str) -> Option<NodeRef> {
        let (head, rest) = split_first(name);
        match self.scope.find(head).map(|b| &b.value) {
            Some(Bound::Node { node: Some(node), .. }) => match rest {
                Some(rest) => {
                    let id = self.store_for(*node).borrow().get_node(node.id, rest)?;
                    Some(NodeRef { id, global: node.global })
                }
                None => Some(*node),
            },
            Some(Bound::Node { node: None, path }) => self.stored_node(&join(path, rest)),
            _ => self.stored_node(name),
        }
    }

    fn stored_value(&self, name: &str) -> Option<String> {
        self.store.borrow().get_copy(name).or_else(|| {
            let global = self.global.as_ref()?;
            let value = global.borrow().get_copy(name);
            value
        })
    }

    fn stored_node(&self, name: &str) -> Option<NodeRef> {
        if let Some(id) = self.store.borrow().get_obj(name) {
            return Some(NodeRef { id, global: false });
        }
        let global = self.global.as_ref()?;
        let id = global.borrow().get_obj(name)?;
        Some(NodeRef { id, global: true })
    }

    pub(crate) fn store_for(&self, node: NodeRef) -> &SharedStore {
        match &self.global {
            Some(global) if node.global => global,
            _ => &self.store,
        }
    }

    pub(crate) fn first_child(&self, node: NodeRef) -> Option<NodeRef> {
        let id = self.store_for(node).borrow().child(node.id)?;
        Some(NodeRef { id, ..node })
    }

    pub(crate) fn next_sibling(&self, node: NodeRef) -> Option<NodeRef> {
        let id = self.store_for(node).borrow().next(node.id)?;
        Some(NodeRef { id, ..node })
    }

    pub(crate) fn child_count(&self, node: NodeRef) -> usize {
        let mut count = 0;
        let mut cur = self.first_child(node);
        while let Some(child) = cur {
            count += 1;
            cur = self.next_sibling(child);
        }
        count
    }

    pub(crate) fn node_name(&self, node: NodeRef) -> String {
        self.store_for(node).borrow().name(node.id).to_owned()
    }

    /// Whether the local binding `name` is on its last iteration.  A node
    /// binding without a next sibling counts as last.
    pub(crate) fn is_last(&self, name: &str) -> bool {
        let Some(binding) = self.scope.find(name) else { return false };
        if binding.last {
            return true;
        }
        match &binding.value {
            Bound::Node { node: Some(node), .. } => self.next_sibling(*node).is_none(),
            Bound::Node { node: None, .. } => true,
            Bound::Str(_) | Bound::Num(_) => false,
        }
    }

    // ── Assignment ────────────────────────────────────────────────────────────

    /// Write `value` to `name`, through a local binding when one matches.
    pub(crate) fn var_set_value(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        let (head, rest) = split_first(name);
        let bound = self.scope.find(head).map(|b| b.value.clone());
        match bound {
            Some(Bound::Node { node: Some(node), .. }) => {
                self.store_for(node).borrow_mut().set_value(node.id, rest.unwrap_or(""), value)?;
            }
            Some(Bound::Node { node: None, path }) => {
                let id = self.set_stored(&join(&path, rest), value)?;
                if rest.is_none() {
                    if let Some(binding) = self.scope.find_mut(head) {
                        binding.value = Bound::Node { node: Some(NodeRef { id, global: false }), path };
                    }
                }
            }
            Some(Bound::Str(_) | Bound::Num(_)) => match rest {
                None => {
                    if let Some(binding) = self.scope.find_mut(head) {
                        binding.value = Bound::Str(value.map(str::to_owned));
                    }
                }
                Some(rest) => warn!(
                    local = head,
                    element = rest,
                    "ignoring set of a sub-element of a local that is not a data node"
                ),
            },
            None => {
                self.set_stored(name, value)?;
            }
        }
        Ok(())
    }

    fn set_stored(&self, name: &str, value: Option<&str>) -> Result<crate::hdf::NodeId> {
        let mut store = self.store.borrow_mut();
        let root = store.root();
        store.set_value(root, name, value)
    }
}

/// The name a `.`/`[]` expression extends.
fn base_name(value: &Value) -> String {
    match value {
        Value::Var(name) | Value::VarNum(name) | Value::Str(name) => name.clone(),
        Value::Num(n) => n.to_string(),
        Value::Null => String::new(),
    }
}

fn join(path: &str, rest: Option<&str>) -> String {
    match rest {
        Some(rest) => format!("{path}.{rest}"),
        None => path.to_owned(),
    }
}

fn forces_numeric(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Gt | BinOp::Gte | BinOp::Lt | BinOp::Lte
    )
}

fn numeric(op: BinOp, a: i64, b: i64) -> Value {
    Value::Num(match op {
        BinOp::Eq => i64::from(a == b),
        BinOp::Ne => i64::from(a != b),
        BinOp::Lt => i64::from(a < b),
        BinOp::Lte => i64::from(a <= b),
        BinOp::Gt => i64::from(a > b),
        BinOp::Gte => i64::from(a >= b),
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div if b == 0 => i64::from(u32::MAX),
        BinOp::Div => a.wrapping_div(b),
        BinOp::Mod if b == 0 => 0,
        BinOp::Mod => a.wrapping_rem(b),
        _ => {
            warn!(?op, "unsupported operator in numeric evaluation");
            0
        }
    })
}

/// String comparison and concatenation.  An absent operand orders before
/// any present one, and `+` yields whichever side is present.
fn string(op: BinOp, a: Option<String>, b: Option<String>) -> Value {
    let ord = a.cmp(&b);
    let truth = match op {
        BinOp::Eq => ord == Ordering::Equal,
        BinOp::Ne => ord != Ordering::Equal,
        BinOp::Lt => ord == Ordering::Less,
        BinOp::Lte => ord != Ordering::Greater,
        BinOp::Gt => ord == Ordering::Greater,
        BinOp::Gte => ord != Ordering::Less,
        BinOp::Add => {
            return match (a, b) {
                (Some(a), Some(b)) => Value::Str(a + &b),
                (a, b) => Value::from(a.or(b)),
            }
        }
        _ => {
            warn!(?op, "unsupported operator in string evaluation");
            false
        }
    };
    Value::Num(i64::from(truth))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdf::Hdf;
    use crate::template::expr::parse_expr;
    use crate::template::scope::Binding;

    fn session_with(pairs: &[(&str, &str)]) -> Session {
        let mut hdf = Hdf::new();
        for (k, v) in pairs {
            hdf.set(k, v);
        }
        Session::new(hdf.into_shared()).unwrap()
    }

    fn eval(s: &mut Session, src: &str) -> Value {
        let expr = parse_expr(src, false, s.functions()).unwrap();
        s.eval(&expr).unwrap()
    }

    fn text(s: &mut Session, src: &str) -> Option<String> {
        let v = eval(s, src);
        s.value_text(&v)
    }

    #[test]
    fn arithmetic_and_division_by_zero() {
        let mut s = session_with(&[]);
        assert_eq!(eval(&mut s, "1 + 2 * 3"), Value::Num(7));
        assert_eq!(eval(&mut s, "(1 + 2) * 3"), Value::Num(9));
        assert_eq!(eval(&mut s, "7 / 0"), Value::Num(4294967295));
        assert_eq!(eval(&mut s, "7 % 0"), Value::Num(0));
        assert_eq!(eval(&mut s, "-7 % 3"), Value::Num(-1));
    }

    #[test]
    fn string_vs_numeric_comparison() {
        let mut s = session_with(&[("a", "10"), ("b", "9")]);
        // Both variables: string comparison for ==, numeric for <.
        assert_eq!(eval(&mut s, "a == b"), Value::Num(0));
        assert_eq!(eval(&mut s, "a < b"), Value::Num(0));
        assert_eq!(eval(&mut s, "#a == 10"), Value::Num(1));
        assert_eq!(eval(&mut s, "a + b"), Value::Str("109".into()));
        assert_eq!(eval(&mut s, "#a + b"), Value::Num(19));
    }

    #[test]
    fn absent_operands_in_string_ops() {
        let mut s = session_with(&[("x", "v")]);
        assert_eq!(eval(&mut s, "nope == nada"), Value::Num(1));
        assert_eq!(eval(&mut s, "x != nope"), Value::Num(1));
        assert_eq!(eval(&mut s, "nope + x"), Value::Str("v".into()));
        assert_eq!(eval(&mut s, "nope + nada"), Value::Null);
    }

    #[test]
    fn truthiness() {
        let mut s = session_with(&[("zero", "0"), ("word", "abc"), ("empty", ""), ("hex", "0x10")]);
        let truth = |s: &mut Session, src: &str| {
            let v = eval(s, src);
            s.value_bool(&v)
        };
        assert!(!truth(&mut s, "zero"));
        assert!(truth(&mut s, "word"));
        assert!(!truth(&mut s, "empty"));
        assert!(!truth(&mut s, "missing"));
        assert!(truth(&mut s, "hex"));
        assert!(truth(&mut s, "\"0a\""));
        assert!(!truth(&mut s, "\"0\""));
        assert!(!truth(&mut s, "#word"));
        assert!(truth(&mut s, "!missing"));
    }

    #[test]
    fn logical_ops_yield_zero_or_one() {
        let mut s = session_with(&[("a", "5")]);
        assert_eq!(eval(&mut s, "a && 3"), Value::Num(1));
        assert_eq!(eval(&mut s, "a && missing"), Value::Num(0));
        assert_eq!(eval(&mut s, "missing || a"), Value::Num(1));
    }

    #[test]
    fn exists_operator() {
        let mut s = session_with(&[("here", "")]);
        assert_eq!(eval(&mut s, "?here"), Value::Num(1));
        assert_eq!(eval(&mut s, "?gone"), Value::Num(0));
        assert_eq!(eval(&mut s, "?\"literal\""), Value::Num(1));
    }

    #[test]
    fn bracket_and_dot_build_names() {
        let mut s = session_with(&[("idx", "k"), ("m.k", "found"), ("l.2", "two")]);
        assert_eq!(eval(&mut s, "m[idx]"), Value::Var("m.k".into()));
        assert_eq!(text(&mut s, "m[idx]").as_deref(), Some("found"));
        assert_eq!(eval(&mut s, "l[1 + 1]"), Value::Var("l.2".into()));
        assert_eq!(eval(&mut s, "m.idx"), Value::Var("m.idx".into()));
        assert_eq!(eval(&mut s, "m[missing]"), Value::Var(String::new()));
        assert_eq!(eval(&mut s, "m[\"k\"]"), Value::Var("m.k".into()));
    }

    #[test]
    fn comma_yields_last() {
        let mut s = session_with(&[]);
        assert_eq!(eval(&mut s, "1, 2, 3"), Value::Num(3));
    }

    #[test]
    fn function_calls_and_escape_flag() {
        let mut s = session_with(&[("t", "<b>"), ("list.a", "1"), ("list.b", "2")]);
        assert_eq!(eval(&mut s, "len(list)"), Value::Num(2));
        assert_eq!(eval(&mut s, "max(3, 9)"), Value::Num(9));
        assert!(!s.escaping.explicit);
        assert_eq!(eval(&mut s, "html_escape(t)"), Value::Str("&lt;b&gt;".into()));
        assert!(s.escaping.explicit);
    }

    #[test]
    fn lookup_through_bindings() {
        let mut s = session_with(&[("list.0.name", "first"), ("list.1.name", "second")]);
        let list = s.lookup_node("list").unwrap();
        let child = s.first_child(list).unwrap();
        s.scope.push(Binding::node("item", child));
        assert_eq!(s.lookup("item.name").as_deref(), Some("first"));
        assert!(!s.is_last("item"));
        s.scope.rebind(Binding::node("item", s.next_sibling(child).unwrap()));
        assert_eq!(s.lookup("item.name").as_deref(), Some("second"));
        assert!(s.is_last("item"));
        s.scope.push(Binding::new("n", Bound::Num(4)));
        assert_eq!(s.lookup("n").as_deref(), Some("4"));
    }

    #[test]
    fn global_store_is_fallback() {
        let mut s = session_with(&[("local", "L")]);
        let mut global = Hdf::new();
        global.set("shared", "G");
        global.set("local", "hidden");
        s.set_global(global.into_shared());
        assert_eq!(s.lookup("shared").as_deref(), Some("G"));
        assert_eq!(s.lookup("local").as_deref(), Some("L"));
        assert!(s.lookup_node("shared").unwrap().global);
    }

    #[test]
    fn set_through_bindings() {
        let mut s = session_with(&[("obj.a", "1")]);
        let obj = s.lookup_node("obj").unwrap();
        s.scope.push(Binding::node("o", obj));
        s.var_set_value("o.b", Some("2")).unwrap();
        assert_eq!(s.lookup("obj.b").as_deref(), Some("2"));

        s.scope.push(Binding::new("lit", Bound::Str(Some("x".into()))));
        s.var_set_value("lit", Some("y")).unwrap();
        assert_eq!(s.lookup("lit").as_deref(), Some("y"));
        s.var_set_value("lit.sub", Some("z")).unwrap();
        assert_eq!(s.store().borrow().get_copy("lit.sub"), None);

        s.scope.push(Binding::new("p", Bound::Node { node: None, path: "fresh.node".into() }));
        s.var_set_value("p", Some("v")).unwrap();
        assert_eq!(s.store().borrow().get_copy("fresh.node").as_deref(), Some("v"));
        assert!(matches!(s.scope.find("p").unwrap().value, Bound::Node { node: Some(_), .. }));
    }
}
