//! notesync: mirror Apple Notes into a Firebase Realtime Database.
//!
//! # Usage
//!
//! ```text
//! notesync config init --database-url <url>
//! notesync config show
//! notesync sync [--dry-run] [--json]
//! notesync status [--json]
//! notesync daemon start|install|uninstall|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{
    config::ConfigCommand, daemon::DaemonCommand, status::StatusArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "notesync",
    version,
    about = "Mirror Apple Notes into a Firebase Realtime Database",
    long_about = None,
)]
struct Cli {
    /// Log progress to stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or inspect ~/.notesync/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run one sync now.
    Sync(SyncArgs),

    /// Show what the last sync recorded in the database.
    Status(StatusArgs),

    /// Run the interval daemon or manage its launchd agent.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    // The daemon installs its own subscriber.
    if !matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommand::Start
        }
    ) {
        init_logging(cli.verbose);
    }

    match cli.command {
        Commands::Config { command } => commands::config::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
