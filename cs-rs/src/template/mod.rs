//! The `<?cs ... ?>` template language.
//!
//! A [`Session`] parses template text into a statement tree and renders it
//! against a hierarchical data store:
//!
//! - Output: `var`, `uvar`, `name`, `lvar`, `evar`
//! - Control flow: `if` / `elif` / `else`, `each`, `with`, `loop`, `alt`
//! - Macros: `def` … `/def` and `call`
//! - Assignment: `set`
//! - Composition: `include`, `linclude`
//! - Escaping: `escape:"html|js|url|none"` blocks and `Config.VarEscapeMode`
//!
//! # Quick start
//!
//! ```rust
//! use cs::hdf::Hdf;
//! use cs::template::Session;
//!
//! let mut hdf = Hdf::new();
//! hdf.set("Page.Title", "Hello");
//! hdf.set("Page.Items.0", "one");
//! hdf.set("Page.Items.1", "two");
//!
//! let mut session = Session::new(hdf.into_shared()).unwrap();
//! session
//!     .parse_str("<?cs var:Page.Title ?>:<?cs each:i = Page.Items ?> <?cs var:i ?><?cs /each ?>")
//!     .unwrap();
//! assert_eq!(session.render_to_string().unwrap(), "Hello: one two");
//! ```

mod builtins;
mod eval;
mod parser;
mod render;

pub mod escape;
pub mod expr;
pub mod functions;
pub mod macros;
pub mod scope;
pub mod session;
pub mod stmt;
pub mod value;

// Re-exports for convenience.
pub use escape::EscapeMode;
pub use functions::{FromArg, FromArgs, Function, FunctionTable};
pub use session::{default_loader, FileLoader, IoSink, OutputSink, Session};
pub use value::Value;
