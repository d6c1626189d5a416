//! Functions available to every root session.

use crate::error::Result;

use super::escape::{html_escape, js_escape, url_escape};
use super::functions::{Function, FunctionTable};
use super::session::Session;
use super::value::Value;

/// Register the built-in functions into `table`.
pub fn register_all(table: &mut FunctionTable) -> Result<()> {
    table.register(Function::typed("len", subcount))?;
    table.register(Function::typed("subcount", subcount))?;
    table.register(Function::typed("name", name))?;
    table.register(Function::typed("first", first))?;
    table.register(Function::typed("last", last))?;
    table.register(Function::typed("abs", |_, (n,): (i64,)| Ok(n.wrapping_abs())))?;
    table.register(Function::typed("max", |_, (a, b): (i64, i64)| Ok(a.max(b))))?;
    table.register(Function::typed("min", |_, (a, b): (i64, i64)| Ok(a.min(b))))?;
    table.register(Function::typed("string.find", string_find))?;
    table.register(Function::typed("string.slice", string_slice))?;
    table.register(Function::typed("string.length", string_length))?;
    table.register(Function::string("html_escape", html_escape).escaping())?;
    table.register(Function::string("js_escape", js_escape).escaping())?;
    table.register(Function::string("url_escape", url_escape).escaping())?;
    Ok(())
}

/// Number of children of a variable node; 0 for anything else.
fn subcount(session: &Session, (value,): (Value,)) -> Result<i64> {
    let Value::Var(name) = value else { return Ok(0) };
    Ok(session.lookup_node(&name).map_or(0, |node| session.child_count(node) as i64))
}

/// Last segment of a variable's node name, or the string itself.
fn name(session: &Session, (value,): (Value,)) -> Result<Value> {
    Ok(match value {
        Value::Var(var) => {
            Value::Str(session.lookup_node(&var).map(|n| session.node_name(n)).unwrap_or_default())
        }
        Value::Str(s) => Value::Str(s),
        _ => Value::Str(String::new()),
    })
}

/// True on the first iteration of the `each`/`loop` binding `name`.
fn first(session: &Session, (value,): (Value,)) -> Result<i64> {
    let Value::Var(var) = value else { return Ok(0) };
    if var.contains('.') {
        return Ok(0);
    }
    Ok(session.scope().find(&var).is_some_and(|b| b.first) as i64)
}

/// True on the last iteration of the `each`/`loop` binding `name`.
fn last(session: &Session, (value,): (Value,)) -> Result<i64> {
    let Value::Var(var) = value else { return Ok(0) };
    if var.contains('.') {
        return Ok(0);
    }
    Ok(session.is_last(&var) as i64)
}

fn string_find(_: &Session, (haystack, needle): (Option<String>, Option<String>)) -> Result<i64> {
    let (Some(haystack), Some(needle)) = (haystack, needle) else { return Ok(-1) };
    Ok(haystack.find(&needle).map_or(-1, |i| i as i64))
}

/// Byte slice `[begin, end)` with negative indices counted from the end.
fn string_slice(_: &Session, (s, begin, end): (Option<String>, i64, i64)) -> Result<String> {
    let Some(s) = s else { return Ok(String::new()) };
    let len = s.len() as i64;
    let (mut b, mut e) = (begin, end);
    if b < 0 && e == 0 {
        e = len;
    }
    if b < 0 {
        b += len;
    }
    if e < 0 {
        e += len;
    }
    e = e.min(len);
    b = b.max(0);
    if e < b {
        b = e;
    }
    if b == e {
        return Ok(String::new());
    }
    let bytes = &s.as_bytes()[b as usize..e as usize];
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn string_length(session: &Session, (value,): (Value,)) -> Result<i64> {
    Ok(match value {
        Value::Str(_) | Value::Var(_) => session.value_str(&value).map_or(0, |s| s.len() as i64),
        _ => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s() -> Session {
        Session::new(crate::hdf::Hdf::new().into_shared()).unwrap()
    }

    #[test]
    fn all_builtins_registered() {
        let mut table = FunctionTable::new();
        register_all(&mut table).unwrap();
        for name in [
            "len", "subcount", "name", "first", "last", "abs", "max", "min",
            "string.find", "string.slice", "string.length",
            "html_escape", "js_escape", "url_escape",
        ] {
            assert!(table.contains(name), "{name} missing");
        }
        assert!(table.get("html_escape").unwrap().escapes);
        assert!(!table.get("len").unwrap().escapes);
    }

    #[test]
    fn slice_semantics() {
        let sess = s();
        let slice = |v: &str, b, e| string_slice(&sess, (Some(v.to_owned()), b, e)).unwrap();
        assert_eq!(slice("abcdef", 1, 3), "bc");
        assert_eq!(slice("abcdef", -2, 0), "ef");
        assert_eq!(slice("abcdef", 0, -1), "abcde");
        assert_eq!(slice("abcdef", 2, 100), "cdef");
        assert_eq!(slice("abcdef", 4, 2), "");
        assert_eq!(slice("abcdef", -100, 2), "ab");
        assert_eq!(string_slice(&sess, (None, 0, 1)).unwrap(), "");
    }

    #[test]
    fn find_semantics() {
        let sess = s();
        let find = |h: Option<&str>, n: Option<&str>| {
            string_find(&sess, (h.map(str::to_owned), n.map(str::to_owned))).unwrap()
        };
        assert_eq!(find(Some("hello"), Some("ll")), 2);
        assert_eq!(find(Some("hello"), Some("z")), -1);
        assert_eq!(find(None, Some("z")), -1);
        assert_eq!(find(Some("hello"), Some("")), 0);
    }
}
