//! tick - a local, file-based task tracker
//!
//! Tasks are kept in an append-friendly JSONL log with a SQLite cache for
//! queries, safe to use from several agent sessions at once.

use clap::Parser;
use tick::cli::Cli;
use tick::error::Error;
use tick::output::{emit_error, infer_command_name_from_args};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    // Tracing is opt-in via RUST_LOG.
    // Keep startup robust in CI/robot envs: ignore invalid/huge filters.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| {
            let raw = raw.trim();
            if raw.is_empty() || raw.len() > 4096 {
                return None;
            }
            EnvFilter::try_new(raw).ok()
        })
        .unwrap_or_else(|| EnvFilter::new("off"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let command = infer_command_name_from_args();
    let cli = Cli::parse();
    let json = cli.json;
    if let Err(err) = cli.run() {
        // The report envelope already carries failed checks
        let reported = json && matches!(err, Error::ChecksFailed(_));
        if !reported {
            let _ = emit_error(&command, &err, json);
        }
        std::process::exit(err.exit_code());
    }
}
