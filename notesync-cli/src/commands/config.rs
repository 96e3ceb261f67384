//! `notesync config init|show`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use notesync_core::config::{self, ENV_DATABASE_URL, ENV_LEGACY_DATABASE_URL};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a default config. Leaves an existing file untouched.
    Init(InitArgs),
    /// Print the effective config (file plus environment overrides).
    Show,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Realtime Database URL, e.g. https://my-notes.firebaseio.com.
    /// Falls back to NOTESYNC_DATABASE_URL, then FIREBASE_DATABASE_URL.
    #[arg(long)]
    pub database_url: Option<String>,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        ConfigCommand::Init(args) => {
            let path = config::config_path_at(&home);
            let existed = path.exists();
            let url = args
                .database_url
                .or_else(|| std::env::var(ENV_DATABASE_URL).ok())
                .or_else(|| std::env::var(ENV_LEGACY_DATABASE_URL).ok())
                .unwrap_or_default();
            if url.trim().is_empty() && !existed {
                anyhow::bail!("provide --database-url or set {ENV_DATABASE_URL}");
            }
            config::init_at(&home, &url)
                .with_context(|| format!("failed to initialise {}", path.display()))?;
            if existed {
                println!("✓ Config already exists at {}", path.display());
            } else {
                println!("✓ Wrote {}", path.display());
            }
        }
        ConfigCommand::Show => {
            let config = config::load_at(&home).context("failed to load config")?;
            print!(
                "{}",
                serde_yaml::to_string(&config).context("failed to render config")?
            );
        }
    }
    Ok(())
}
