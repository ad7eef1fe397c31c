//! Fleet: batch change execution engine CLI.
//!
//! # Usage
//!
//! ```text
//! fleet validate <SPEC> [--json]
//! fleet cache path [--cache-dir <DIR>]
//! fleet cache clear [--cache-dir <DIR>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{cache::CacheCommand, validate::ValidateArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fleet",
    version,
    about = "Run one change across many repositories",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse and validate a batch spec, then summarise it.
    Validate(ValidateArgs),

    /// Inspect or clear the execution cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

/// Log to stderr; `RUST_LOG` overrides the default `info` level.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate(args) => args.run(),
        Commands::Cache { command } => commands::cache::run(command),
    }
}
