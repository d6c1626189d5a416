//! Template sessions.
//!
//! A [`Session`] owns one statement tree together with everything needed to
//! build and render it: the parse stack, the macro table and the local scope.
//! The data store, the optional global store, the function table and the file
//! loader are shared with every child session spawned by `lvar`/`linclude`.

use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use tracing::debug;

use crate::config;
use crate::error::{CsError, Location, Result};
use crate::hdf::{DataStore, SharedStore};

use super::builtins;
use super::escape::Escaping;
use super::functions::{FromArgs, Function, FunctionTable};
use super::macros::MacroTable;
use super::parser::{Block, StackEntry};
use super::scope::ScopeStack;
use super::stmt::{State, Stmt};
use super::value::Value;

/// Reads a template file given the store it may take search paths from.
pub type FileLoader = Rc<dyn Fn(&dyn DataStore, &str) -> Result<String>>;

// ── Output ────────────────────────────────────────────────────────────────────

/// Destination for rendered text.
pub trait OutputSink {
    fn emit(&mut self, fragment: &str) -> Result<()>;
}

impl OutputSink for String {
    fn emit(&mut self, fragment: &str) -> Result<()> {
        self.push_str(fragment);
        Ok(())
    }
}

/// Adapter writing rendered text to any [`io::Write`].
#[derive(Debug)]
pub struct IoSink<W: io::Write> {
    inner: W,
}

impl<W: io::Write> IoSink<W> {
    pub fn new(inner: W) -> Self {
        IoSink { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: io::Write> OutputSink for IoSink<W> {
    fn emit(&mut self, fragment: &str) -> Result<()> {
        self.inner.write_all(fragment.as_bytes())?;
        Ok(())
    }
}

// ── Source context ────────────────────────────────────────────────────────────

/// Where the text currently being parsed came from.
#[derive(Debug, Clone, Default)]
pub(crate) enum Origin {
    #[default]
    Anonymous,
    /// Value of an `evar` variable.
    Named(String),
    File(String),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Source {
    pub origin: Origin,
    pub text: Rc<str>,
    /// Byte offset of the directive being parsed.
    pub offset: usize,
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A template parse/render session.
pub struct Session {
    pub(crate) store: SharedStore,
    pub(crate) global: Option<SharedStore>,
    pub(crate) functions: Rc<FunctionTable>,
    pub(crate) macros: MacroTable,
    pub(crate) loader: FileLoader,
    /// Parse stack; the bottom entry owns the statement tree.
    pub(crate) stack: Vec<StackEntry>,
    pub(crate) escaping: Escaping,
    pub(crate) opener: AhoCorasick,
    pub(crate) tag_len: usize,
    pub(crate) source: Source,
    pub(crate) scope: ScopeStack,
}

impl Session {
    /// A root session over `store` with the built-in functions registered.
    ///
    /// Reads `Config.TagStart` and `Config.VarEscapeMode` from the store; an
    /// unknown escape mode is a [`CsError::Config`].
    pub fn new(store: SharedStore) -> Result<Self> {
        let mut functions = FunctionTable::new();
        builtins::register_all(&mut functions)?;
        let loader: FileLoader = Rc::new(default_loader);
        Session::with_parts(store, None, Rc::new(functions), MacroTable::new(), loader)
    }

    fn with_parts(
        store: SharedStore,
        global: Option<SharedStore>,
        functions: Rc<FunctionTable>,
        macros: MacroTable,
        loader: FileLoader,
    ) -> Result<Self> {
        let (tag, mode) = {
            let data = store.borrow();
            (config::tag_start(&*data), config::var_escape_mode(&*data)?)
        };
        let opener = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build([format!("<?{tag}")]);
        let root = StackEntry {
            state: State::Global,
            escape: mode,
            location: Location::Line(1),
            block: Block::Root(Vec::new()),
        };
        Ok(Session {
            store,
            global,
            functions,
            macros,
            loader,
            stack: vec![root],
            escaping: Escaping { global: mode, ..Escaping::default() },
            opener,
            tag_len: tag.len(),
            source: Source::default(),
            scope: ScopeStack::new(),
        })
    }

    /// A session sharing this one's stores, functions, loader and a copy of
    /// its macros, with an empty tree and no local bindings.
    pub fn child(&self) -> Result<Session> {
        debug!(macros = self.macros.len(), "creating child session");
        Session::with_parts(
            Rc::clone(&self.store),
            self.global.clone(),
            Rc::clone(&self.functions),
            self.macros.clone(),
            Rc::clone(&self.loader),
        )
    }

    // ── Collaborators ─────────────────────────────────────────────────────────

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Fallback store consulted when a name is missing from the primary one.
    pub fn set_global(&mut self, global: SharedStore) {
        self.global = Some(global);
    }

    pub fn set_file_loader<F>(&mut self, loader: F)
    where
        F: Fn(&dyn DataStore, &str) -> Result<String> + 'static,
    {
        self.loader = Rc::new(loader);
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    pub fn scope(&self) -> &ScopeStack {
        &self.scope
    }

    /// The statements parsed so far.
    pub fn tree(&self) -> &[Stmt] {
        match self.stack.first() {
            Some(StackEntry { block: Block::Root(body), .. }) => body,
            _ => &[],
        }
    }

    // ── Function registration ─────────────────────────────────────────────────

    /// Register a function taking a typed argument tuple.
    pub fn register_function<A, R, F>(&mut self, name: &str, f: F) -> Result<()>
    where
        A: FromArgs,
        R: Into<Value>,
        F: Fn(&Session, A) -> Result<R> + 'static,
    {
        self.register(Function::typed(name, f))
    }

    /// Register a one-argument string transform.
    pub fn register_str_function<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&str) -> String + 'static,
    {
        self.register(Function::string(name, f))
    }

    /// Register a string transform whose output `var` must not escape again.
    pub fn register_escape_function<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&str) -> String + 'static,
    {
        self.register(Function::string(name, f).escaping())
    }

    pub fn register(&mut self, function: Function) -> Result<()> {
        Rc::make_mut(&mut self.functions).register(function)
    }

    // ── Files and locations ───────────────────────────────────────────────────

    /// Load a template through the file loader, trying the global store's
    /// search paths when the primary store's fail.
    pub(crate) fn read_template(&self, path: &str) -> Result<String> {
        let result = (self.loader)(&*self.store.borrow(), path);
        match result {
            Err(e) if e.is_not_found() && !Path::new(path).is_absolute() => match &self.global {
                Some(global) => (self.loader)(&*global.borrow(), path),
                None => Err(e),
            },
            other => other,
        }
    }

    pub(crate) fn location_at(&self, offset: usize) -> Location {
        let text = self.source.text.as_bytes();
        let end = offset.min(text.len());
        let line = 1 + text[..end].iter().filter(|&&b| b == b'\n').count();
        match &self.source.origin {
            Origin::File(path) => Location::File { path: path.clone(), line },
            Origin::Named(name) => Location::Named { name: name.clone(), line },
            Origin::Anonymous => Location::Line(line),
        }
    }

    /// Location of the directive being parsed.
    pub(crate) fn location(&self) -> Location {
        self.location_at(self.source.offset)
    }

    pub(crate) fn parse_error(&self, message: impl Into<String>) -> CsError {
        CsError::Parse { location: self.location(), message: message.into() }
    }

    pub(crate) fn not_found(&self, message: impl Into<String>) -> CsError {
        CsError::NotFound { location: self.location(), message: message.into() }
    }
}

/// Default [`FileLoader`]: absolute paths are read as-is; relative paths are
/// tried under each `hdf.loadpaths.*` directory and then as given.
pub fn default_loader(store: &dyn DataStore, path: &str) -> Result<String> {
    let given = Path::new(path);
    if !given.is_absolute() {
        for dir in config::load_paths(store) {
            let candidate = Path::new(&dir).join(given);
            if candidate.is_file() {
                return read_file(&candidate);
            }
        }
    }
    read_file(given)
}

fn read_file(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => {
            debug!(path = %path.display(), bytes = text.len(), "loaded template");
            Ok(text)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(CsError::FileNotFound(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdf::Hdf;

    #[test]
    fn invalid_escape_mode_is_config_error() {
        let mut hdf = Hdf::new();
        hdf.set("Config.VarEscapeMode", "xml");
        let err = Session::new(hdf.into_shared()).err().unwrap();
        assert!(matches!(err, CsError::Config(_)));
    }

    #[test]
    fn global_escape_from_config() {
        let mut hdf = Hdf::new();
        hdf.set("Config.VarEscapeMode", "html");
        hdf.set("t", "<b>");
        let mut session = Session::new(hdf.into_shared()).unwrap();
        session.parse_str("<?cs var:t ?>").unwrap();
        assert_eq!(session.render_to_string().unwrap(), "&lt;b&gt;");
    }

    #[test]
    fn duplicate_function_registration() {
        let mut session = Session::new(Hdf::new().into_shared()).unwrap();
        let err = session.register_str_function("len", str::to_owned).unwrap_err();
        assert!(matches!(err, CsError::Duplicate(_)));
    }

    #[test]
    fn child_shares_functions_and_copies_macros() {
        let mut session = Session::new(Hdf::new().into_shared()).unwrap();
        session.register_str_function("shout", |s| s.to_uppercase()).unwrap();
        session.parse_str("<?cs def:m() ?>x<?cs /def ?>").unwrap();
        let child = session.child().unwrap();
        assert!(child.functions().contains("shout"));
        assert!(child.macros().contains("m"));
        assert!(child.tree().is_empty());
    }

    #[test]
    fn location_counts_lines() {
        let mut session = Session::new(Hdf::new().into_shared()).unwrap();
        session.source = Source { origin: Origin::Anonymous, text: Rc::from("a\nb\nc"), offset: 0 };
        assert_eq!(session.location_at(0), Location::Line(1));
        assert_eq!(session.location_at(4), Location::Line(3));
        session.source.origin = Origin::File("f.cs".into());
        assert_eq!(session.location_at(2), Location::File { path: "f.cs".into(), line: 2 });
    }

    #[test]
    fn io_sink_writes_bytes() {
        let mut sink = IoSink::new(Vec::new());
        sink.emit("héllo").unwrap();
        assert_eq!(sink.into_inner(), "héllo".as_bytes());
    }

    #[test]
    fn default_loader_missing_file() {
        let hdf = Hdf::new();
        let err = default_loader(&hdf, "definitely/not/here.cs").unwrap_err();
        assert!(matches!(err, CsError::FileNotFound(_)));
    }

    #[test]
    fn default_loader_uses_load_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("part.cs"), "partial").unwrap();
        let mut hdf = Hdf::new();
        hdf.set("hdf.loadpaths.0", dir.path().to_str().unwrap());
        assert_eq!(default_loader(&hdf, "part.cs").unwrap(), "partial");
    }
}
