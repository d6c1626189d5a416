pub mod cli;
pub mod config;
pub mod error;
pub mod hdf;
pub mod template;

pub use error::{CsError, Result};
