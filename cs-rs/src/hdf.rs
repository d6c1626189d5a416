//! Hierarchical data store.
//!
//! Templates read and write a tree of named nodes addressed by dotted names
//! (`Page.Items.0.Title`).  The engine only talks to the store through the
//! [`DataStore`] trait; [`Hdf`] is the in-memory implementation used by the
//! CLI and the tests.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;

/// Opaque handle to a node inside a [`DataStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// A store shared between a session, its child sessions and the caller.
pub type SharedStore = Rc<RefCell<dyn DataStore>>;

/// The read/write interface the template engine consumes.
pub trait DataStore {
    /// The unnamed top-level node.
    fn root(&self) -> NodeId;

    /// Walk `name` (dot separated) below `base`.  An empty name is `base` itself.
    fn get_node(&self, base: NodeId, name: &str) -> Option<NodeId>;

    /// The scalar value stored at `node`, if any.
    fn value(&self, node: NodeId) -> Option<&str>;

    /// The last path segment of `node`.
    fn name(&self, node: NodeId) -> &str;

    /// First child of `node`.
    fn child(&self, node: NodeId) -> Option<NodeId>;

    /// Next sibling of `node`.
    fn next(&self, node: NodeId) -> Option<NodeId>;

    /// Set the value at `name` below `base`, creating intermediate nodes.
    fn set_value(&mut self, base: NodeId, name: &str, value: Option<&str>) -> Result<NodeId>;

    /// Look up a node by its full name.
    fn get_obj(&self, name: &str) -> Option<NodeId> {
        self.get_node(self.root(), name)
    }

    /// Look up a scalar by its full name, falling back to `default`.
    fn get_value<'a>(&'a self, name: &str, default: Option<&'a str>) -> Option<&'a str> {
        self.get_obj(name).and_then(|n| self.value(n)).or(default)
    }

    /// Owned copy of a scalar.
    fn get_copy(&self, name: &str) -> Option<String> {
        self.get_value(name, None).map(str::to_owned)
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    value: Option<String>,
    child: Option<NodeId>,
    last_child: Option<NodeId>,
    next: Option<NodeId>,
}

impl Node {
    fn new(name: &str) -> Self {
        Node { name: name.to_owned(), value: None, child: None, last_child: None, next: None }
    }
}

/// In-memory hierarchical data set.
///
/// Nodes live in an arena and are never removed, so a [`NodeId`] stays valid
/// for the lifetime of the store.  Children keep insertion order.
#[derive(Debug, Clone)]
pub struct Hdf {
    nodes: Vec<Node>,
}

impl Default for Hdf {
    fn default() -> Self {
        Hdf { nodes: vec![Node::new("")] }
    }
}

impl Hdf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap this data set for use by a [`Session`](crate::template::Session).
    pub fn into_shared(self) -> SharedStore {
        Rc::new(RefCell::new(self))
    }

    /// Set (or overwrite) a value by full name.
    pub fn set(&mut self, name: &str, value: impl AsRef<str>) {
        let root = self.root();
        self.set_at(root, name, Some(value.as_ref()));
    }

    /// Get a value by full name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_value(name, None)
    }

    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_child(&self, parent: NodeId, seg: &str) -> Option<NodeId> {
        let mut cur = self.nodes[parent.0].child;
        while let Some(id) = cur {
            if self.nodes[id.0].name == seg {
                return Some(id);
            }
            cur = self.nodes[id.0].next;
        }
        None
    }

    fn add_child(&mut self, parent: NodeId, seg: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(seg));
        match self.nodes[parent.0].last_child {
            Some(last) => self.nodes[last.0].next = Some(id),
            None => self.nodes[parent.0].child = Some(id),
        }
        self.nodes[parent.0].last_child = Some(id);
        id
    }

    fn set_at(&mut self, base: NodeId, name: &str, value: Option<&str>) -> NodeId {
        let mut cur = base;
        if !name.is_empty() {
            for seg in name.split('.') {
                cur = match self.find_child(cur, seg) {
                    Some(id) => id,
                    None => self.add_child(cur, seg),
                };
            }
        }
        self.nodes[cur.0].value = value.map(str::to_owned);
        cur
    }
}

impl DataStore for Hdf {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn get_node(&self, base: NodeId, name: &str) -> Option<NodeId> {
        if base.0 >= self.nodes.len() {
            return None;
        }
        if name.is_empty() {
            return Some(base);
        }
        name.split('.').try_fold(base, |cur, seg| self.find_child(cur, seg))
    }

    fn value(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0)?.value.as_deref()
    }

    fn name(&self, node: NodeId) -> &str {
        self.nodes.get(node.0).map(|n| n.name.as_str()).unwrap_or("")
    }

    fn child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.child
    }

    fn next(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.next
    }

    fn set_value(&mut self, base: NodeId, name: &str, value: Option<&str>) -> Result<NodeId> {
        if base.0 >= self.nodes.len() {
            return Err(crate::error::CsError::Assert(format!("invalid node handle {}", base.0)));
        }
        Ok(self.set_at(base, name, value))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
