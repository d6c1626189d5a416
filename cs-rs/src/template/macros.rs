//! User-defined macros (`def:` … `/def`).

use std::collections::HashMap;
use std::rc::Rc;

use super::stmt::Stmt;

/// A named, parameterised template fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    pub name: String,
    pub params: Vec<String>,
    pub body: Rc<[Stmt]>,
}

impl Macro {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Macro { name: name.into(), params, body: Rc::from(Vec::new()) }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Macros visible to a session.  Child sessions start with a copy.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    map: HashMap<String, Rc<Macro>>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Rc<Macro>> {
        self.map.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Register a macro.  Returns `false` if the name is already taken.
    pub fn define(&mut self, mac: Macro) -> bool {
        if self.map.contains_key(&mac.name) {
            return false;
        }
        self.map.insert(mac.name.clone(), Rc::new(mac));
        true
    }

    /// Install the body of a macro once its `/def` is reached.
    pub fn set_body(&mut self, name: &str, body: Vec<Stmt>) {
        if let Some(slot) = self.map.get_mut(name) {
            let mut mac = Macro::clone(slot);
            mac.body = Rc::from(body);
            *slot = Rc::new(mac);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_rejects_duplicates() {
        let mut table = MacroTable::new();
        assert!(table.define(Macro::new("m", vec!["a".into()])));
        assert!(!table.define(Macro::new("m", Vec::new())));
        assert_eq!(table.get("m").unwrap().arity(), 1);
    }

    #[test]
    fn body_installed_after_definition() {
        let mut table = MacroTable::new();
        table.define(Macro::new("m", Vec::new()));
        assert!(table.get("m").unwrap().body.is_empty());
        table.set_body("m", vec![Stmt::Literal("x".into())]);
        assert_eq!(&*table.get("m").unwrap().body, &[Stmt::Literal("x".into())]);
    }

    #[test]
    fn clones_are_independent() {
        let mut parent = MacroTable::new();
        parent.define(Macro::new("a", Vec::new()));
        let mut child = parent.clone();
        child.define(Macro::new("b", Vec::new()));
        assert!(!parent.contains("b"));
        assert!(child.contains("a"));
    }
}
