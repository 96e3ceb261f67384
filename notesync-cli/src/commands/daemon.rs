//! `notesync daemon`: interval daemon and launchd agent management.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use notesync_daemon::paths::{stderr_log_path, stdout_log_path};
use notesync_daemon::{install_launchd, start_blocking, uninstall_launchd};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the sync daemon in the foreground until ctrl-c.
    Start,
    /// Install and start a launchd agent running `notesync daemon start`.
    Install,
    /// Stop and remove the launchd agent.
    Uninstall,
    /// Print recent daemon log lines.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only the stderr log.
    #[arg(long)]
    pub stderr_only: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Install => {
            let binary = std::env::current_exe().context("could not locate the notesync binary")?;
            let path =
                install_launchd(&home, &binary).context("failed to install launchd agent")?;
            println!("✓ Installed launchd agent: {}", path.display());
        }
        DaemonCommand::Uninstall => {
            uninstall_launchd(&home).context("failed to uninstall launchd agent")?;
            println!("✓ Uninstalled launchd agent");
        }
        DaemonCommand::Logs(args) => {
            if !args.stderr_only {
                print_tail(&stdout_log_path(&home), args.lines)?;
            }
            print_tail(&stderr_log_path(&home), args.lines)?;
        }
    }

    Ok(())
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if lines == 0 {
            continue;
        }
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
