//! `notesync status`: last-sync visibility from the database's metadata.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use notesync_core::{config, SyncMetadata};
use notesync_daemon::paths::launchd_plist_path;
use notesync_sync::{FirebaseStore, RemoteStore};

/// Arguments for `notesync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = config::load_at(&home).context("failed to load config")?;
        let metadata = FirebaseStore::new(&config)
            .fetch_metadata()
            .with_context(|| format!("failed to read metadata from {}", config.database_url))?;

        let report = StatusReport {
            database: config.database_url.clone(),
            freshness: freshness(metadata.as_ref(), config.interval(), Utc::now()),
            last_sync: metadata.as_ref().map(|m| m.last_sync.clone()),
            note_count: metadata.as_ref().map(|m| m.note_count),
            deleted_count: metadata.as_ref().map(|m| m.deleted_count),
            daemon_installed: launchd_plist_path(&home).exists(),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
        } else {
            print_table(&report);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Freshness {
    NeverSynced,
    Current { age: String },
    /// No sync in more than two intervals.
    Overdue { age: String },
    /// `last_sync` is not a timestamp we can read.
    Unknown,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    database: String,
    #[serde(flatten)]
    freshness: Freshness,
    last_sync: Option<String>,
    note_count: Option<usize>,
    deleted_count: Option<usize>,
    daemon_installed: bool,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
    #[tabled(rename = "notes")]
    notes: String,
    #[tabled(rename = "deleted")]
    deleted: String,
}

fn freshness(metadata: Option<&SyncMetadata>, interval: Duration, now: DateTime<Utc>) -> Freshness {
    let Some(metadata) = metadata else {
        return Freshness::NeverSynced;
    };
    let Ok(last) = DateTime::parse_from_rfc3339(&metadata.last_sync) else {
        return Freshness::Unknown;
    };
    let seconds = now
        .signed_duration_since(last.with_timezone(&Utc))
        .num_seconds()
        .max(0) as u64;
    let age = format_seconds(seconds);
    if seconds > interval.as_secs().saturating_mul(2) {
        Freshness::Overdue { age }
    } else {
        Freshness::Current { age }
    }
}

fn format_seconds(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{s}s ago"),
        s if s < 60 * 60 => format!("{}m ago", s / 60),
        s if s < 60 * 60 * 24 => format!("{}h ago", s / (60 * 60)),
        s => format!("{}d ago", s / (60 * 60 * 24)),
    }
}

fn print_table(report: &StatusReport) {
    let daemon = if report.daemon_installed {
        "daemon agent installed".green().to_string()
    } else {
        "daemon agent not installed".bright_black().to_string()
    };
    println!(
        "notesync v{} | {} | {}",
        env!("CARGO_PKG_VERSION"),
        report.database,
        daemon
    );

    let (status, last_sync) = match &report.freshness {
        Freshness::NeverSynced => ("NEVER SYNCED".bright_black().bold(), "never".to_string()),
        Freshness::Current { age } => ("CURRENT".green().bold(), age.clone()),
        Freshness::Overdue { age } => ("OVERDUE".yellow().bold(), age.clone()),
        Freshness::Unknown => (
            "UNKNOWN".red().bold(),
            report.last_sync.clone().unwrap_or_default(),
        ),
    };
    let count = |n: Option<usize>| n.map_or_else(|| "-".to_string(), |n| n.to_string());
    let mut table = Table::new([StatusTableRow {
        status: status.to_string(),
        last_sync,
        notes: count(report.note_count),
        deleted: count(report.deleted_count),
    }]);
    table.with(Style::rounded());
    println!("{table}");

    match report.freshness {
        Freshness::NeverSynced => println!("Run 'notesync sync' to perform the first sync."),
        Freshness::Overdue { .. } if !report.daemon_installed => {
            println!("Run 'notesync daemon install' to sync in the background.")
        }
        _ => {}
    }
}
