use clap::Parser;
use tracing_subscriber::EnvFilter;

use cs::cli::{self, CliArgs};

fn main() {
    // Diagnostics go to stderr so they never mix with rendered output.
    let filter = EnvFilter::try_from_env("CS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    if let Err(e) = cli::run(&args) {
        eprintln!("cs: {e}");
        std::process::exit(1);
    }
}
