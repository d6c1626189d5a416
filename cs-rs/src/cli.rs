//! Command-line interface.
//!
//! Usage:
//!   cs [-d <file>]... [-g <file>]... [-s NAME=VALUE]... [-I <dir>]... [-o <file>] <template>
//!
//! Relative template paths are searched in the `-I` directories, then in the
//! directories listed in `$CS_LOADPATH`, then in the per-user data directory.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use directories::ProjectDirs;
use tracing::{info, warn};

use crate::config::{self, LOAD_PATHS};
use crate::error::{CsError, Result};
use crate::hdf::Hdf;
use crate::template::{IoSink, Session};

/// Environment variable holding extra template directories.
pub const LOADPATH_ENV: &str = "CS_LOADPATH";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "cs", version, about = "Render a <?cs ?> template against data files")]
pub struct CliArgs {
    /// Template file to render.
    pub template: PathBuf,

    /// Data file loaded into the store (repeatable).
    #[arg(short, long = "data", value_name = "FILE")]
    pub data: Vec<PathBuf>,

    /// Data file loaded into the fallback global store (repeatable).
    #[arg(short, long = "global", value_name = "FILE")]
    pub global: Vec<PathBuf>,

    /// Direct assignment applied after the data files (repeatable).
    #[arg(short, long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    pub set: Vec<(String, String)>,

    /// Template search directory (repeatable).
    #[arg(short = 'I', long = "include-dir", value_name = "DIR")]
    pub include_dirs: Vec<PathBuf>,

    /// Write output here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Parse `NAME=VALUE`.
pub fn parse_assignment(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected NAME=VALUE, got {s:?}")),
    }
}

// ── Running ───────────────────────────────────────────────────────────────────

/// Template search directories: `-I` flags, then `$CS_LOADPATH`, then the
/// per-user data directory.
pub fn search_dirs(args: &CliArgs, env_path: Option<OsString>) -> Vec<PathBuf> {
    let mut dirs = args.include_dirs.clone();
    if let Some(paths) = env_path {
        dirs.extend(std::env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()));
    }
    if let Some(proj) = ProjectDirs::from("", "", "cs") {
        dirs.push(proj.data_dir().join("templates"));
    }
    dirs
}

fn load_data(hdf: &mut Hdf, path: &Path) -> Result<()> {
    let errors = config::load_file(hdf, path)
        .map_err(|e| CsError::Config(format!("cannot read {}: {e}", path.display())))?;
    for e in errors {
        warn!(file = %path.display(), "{e}");
    }
    Ok(())
}

/// Build the stores, parse the template and write the rendered output.
pub fn run(args: &CliArgs) -> Result<()> {
    let mut hdf = Hdf::new();
    for path in &args.data {
        load_data(&mut hdf, path)?;
    }
    for (name, value) in &args.set {
        hdf.set(name, value);
    }
    let first = config::load_paths(&hdf).len();
    for (i, dir) in search_dirs(args, std::env::var_os(LOADPATH_ENV)).iter().enumerate() {
        hdf.set(&format!("{LOAD_PATHS}.{}", first + i), dir.to_string_lossy());
    }

    let mut session = Session::new(hdf.into_shared())?;
    if !args.global.is_empty() {
        let mut global = Hdf::new();
        for path in &args.global {
            load_data(&mut global, path)?;
        }
        session.set_global(global.into_shared());
    }

    session.parse_file(&args.template.to_string_lossy())?;
    info!(template = %args.template.display(), "parsed");

    match &args.output {
        Some(path) => {
            let mut sink = IoSink::new(BufWriter::new(File::create(path)?));
            session.render(&mut sink)?;
            sink.into_inner().flush()?;
        }
        None => {
            let mut sink = IoSink::new(io::stdout().lock());
            session.render(&mut sink)?;
            sink.into_inner().flush()?;
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
