//! Local name bindings introduced by `each`, `with`, `loop` and `call`.
//!
//! Bindings live in a stack of frames.  Lookup walks the frames innermost
//! first and stops after an *opaque* frame, which is how a macro body sees
//! its parameters but not the caller's loop variables.

use crate::hdf::NodeId;

/// A node in either the primary or the global store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    pub id: NodeId,
    pub global: bool,
}

/// What a local name is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    /// A store node.  `node` is `None` when the name did not exist when the
    /// binding was made; `path` keeps the full name so a `set` can create it.
    Node { node: Option<NodeRef>, path: String },
    Str(Option<String>),
    Num(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub value: Bound,
    pub first: bool,
    pub last: bool,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: Bound) -> Self {
        Binding { name: name.into(), value, first: false, last: false }
    }

    pub fn node(name: &str, node: NodeRef) -> Self {
        Binding::new(name, Bound::Node { node: Some(node), path: String::new() })
    }
}

#[derive(Debug, Default)]
struct Frame {
    bindings: Vec<Binding>,
    opaque: bool,
}

#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame that extends the enclosing scope.
    pub fn push(&mut self, binding: Binding) {
        self.frames.push(Frame { bindings: vec![binding], opaque: false });
    }

    /// Push a frame that hides everything below it.
    pub fn push_opaque(&mut self, bindings: Vec<Binding>) {
        self.frames.push(Frame { bindings, opaque: true });
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Replace the single binding of the innermost frame.
    pub fn rebind(&mut self, binding: Binding) {
        if let Some(frame) = self.frames.last_mut() {
            frame.bindings.clear();
            frame.bindings.push(binding);
        }
    }

    /// Innermost visible binding called `name`.
    pub fn find(&self, name: &str) -> Option<&Binding> {
        for frame in self.frames.iter().rev() {
            if let Some(b) = frame.bindings.iter().find(|b| b.name == name) {
                return Some(b);
            }
            if frame.opaque {
                break;
            }
        }
        None
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Binding> {
        for frame in self.frames.iter_mut().rev() {
            let opaque = frame.opaque;
            if let Some(b) = frame.bindings.iter_mut().find(|b| b.name == name) {
                return Some(b);
            }
            if opaque {
                break;
            }
        }
        None
    }
}

/// Split `a.b.c` into `("a", Some("b.c"))`.
pub fn split_first(name: &str) -> (&str, Option<&str>) {
    match name.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (name, None),
    }
}
