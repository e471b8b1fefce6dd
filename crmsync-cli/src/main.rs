//! crmsync — converge Pipedrive towards the source database export.
//!
//! # Usage
//!
//! ```text
//! crmsync sync --source export.csv [--dry-run] [--out-dir logs] [--json]
//! crmsync plan --source export.csv [--json]
//! crmsync check
//! ```
//!
//! The API token is read from `PIPEDRIVE_API_TOKEN` or the `--config` file.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, plan::PlanArgs, sync::SyncArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "crmsync",
    version,
    about = "Reconcile Pipedrive organizations and persons against a database export",
    long_about = None,
)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile the CRM against the export and write audit logs.
    Sync(SyncArgs),

    /// Show the mutations a sync would make, without making them.
    Plan(PlanArgs),

    /// Verify the API token by asking the CRM who we are.
    Check(CheckArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Check(args) => args.run(),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Logs go to stderr so `--json` output on stdout stays parseable.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
