//! `notesync sync`: one full run in the foreground.

use anyhow::{Context, Result};
use clap::Args;

use notesync_core::config;
use notesync_sync::{FirebaseStore, OsascriptSource, RunOptions, RunReport};

/// Arguments for `notesync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Read notes and the database, report the changes, write nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the run report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = config::load_at(&home).context("failed to load config")?;

        let source = OsascriptSource::new(config.source_command.clone());
        let store = FirebaseStore::new(&config);
        let options = RunOptions::from_config(&config).dry_run(self.dry_run);
        let report = notesync_sync::run(&source, &store, &options)
            .with_context(|| format!("sync against {} failed", config.database_url))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize report")?
            );
        } else {
            print_report(&report);
        }

        if report.failures() > 0 {
            anyhow::bail!("{} write(s) failed; see the log above", report.failures());
        }
        Ok(())
    }
}

fn print_report(report: &RunReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };

    if report.skipped {
        println!("{prefix}✓ no notes read from the source; database left untouched");
        return;
    }

    println!(
        "{prefix}✓ {} note(s) read: {} new, {} updated, {} to delete",
        report.observed, report.new, report.updated, report.to_delete
    );
    if report.failed_windows > 0 {
        println!(
            "  !  {} of {} window(s) could not be read",
            report.failed_windows, report.windows
        );
    }
    if report.deletions_suppressed > 0 {
        println!(
            "  !  {} deletion(s) postponed until every window reads",
            report.deletions_suppressed
        );
    }
    if let Some(applied) = &report.applied {
        println!(
            "  ✎  {}/{} written, {}/{} deleted",
            applied.upserts.succeeded,
            applied.upserts.attempted,
            applied.deletes.succeeded,
            applied.deletes.attempted
        );
        for key in applied.upserts.failed.iter().chain(&applied.deletes.failed) {
            println!("  ✗  {key}");
        }
        if !applied.metadata_written {
            println!("  ✗  sync metadata not recorded");
        }
    }
}
