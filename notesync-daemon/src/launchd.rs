//! launchd user agent for `notesync daemon start`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{io_err, DaemonError};
use crate::paths::{launch_agents_dir, launchd_plist_path, logs_dir, DAEMON_LABEL};

/// Seconds launchd waits before restarting a daemon that exited with an error.
pub const RESTART_THROTTLE_SECS: u32 = 60;

/// Render the agent plist that runs `<binary> daemon start`.
///
/// The agent is restarted only after an unsuccessful exit, so a clean
/// shutdown stays down and a startup failure (bad config, unreachable store)
/// is retried at most once a minute.
pub fn generate_plist(binary: &Path, log_dir: &Path) -> String {
    let stdout = log_dir.join(crate::paths::DAEMON_STDOUT_LOG);
    let stderr = log_dir.join(crate::paths::DAEMON_STDERR_LOG);

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{DAEMON_LABEL}</string>
  <key>ProgramArguments</key>
  <array>
    <string>{binary}</string>
    <string>daemon</string>
    <string>start</string>
  </array>
  <key>RunAtLoad</key>
  <true/>
  <key>KeepAlive</key>
  <dict>
    <key>SuccessfulExit</key>
    <false/>
  </dict>
  <key>ThrottleInterval</key>
  <integer>{RESTART_THROTTLE_SECS}</integer>
  <key>ProcessType</key>
  <string>Background</string>
  <key>StandardOutPath</key>
  <string>{stdout}</string>
  <key>StandardErrorPath</key>
  <string>{stderr}</string>
</dict>
</plist>
"#,
        binary = xml_escape(&binary.display().to_string()),
        stdout = xml_escape(&stdout.display().to_string()),
        stderr = xml_escape(&stderr.display().to_string()),
    )
}

/// Write the agent plist for `binary` and (re)load it for the current user.
pub fn install(home: &Path, binary: &Path) -> Result<PathBuf, DaemonError> {
    ensure_macos()?;

    for dir in [launch_agents_dir(home), logs_dir(home)] {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }

    let plist = launchd_plist_path(home);
    fs::write(&plist, generate_plist(binary, &logs_dir(home))).map_err(|e| io_err(&plist, e))?;

    let domain = launchctl_domain()?;
    let service = format!("{domain}/{DAEMON_LABEL}");
    // A previous install may still be loaded.
    let _ = launchctl(&["bootout", &service], true);
    launchctl(&["bootstrap", &domain, &plist.display().to_string()], false)?;
    launchctl(&["kickstart", "-k", &service], false)?;

    tracing::info!(plist = %plist.display(), "installed launchd agent");
    Ok(plist)
}

/// Unload the agent and remove its plist. A missing plist is not an error.
pub fn uninstall(home: &Path) -> Result<(), DaemonError> {
    ensure_macos()?;

    let plist = launchd_plist_path(home);
    if !plist.exists() {
        return Ok(());
    }
    let service = format!("{}/{DAEMON_LABEL}", launchctl_domain()?);
    let _ = launchctl(&["bootout", &service], true);
    fs::remove_file(&plist).map_err(|e| io_err(&plist, e))
}

#[cfg(target_os = "macos")]
fn ensure_macos() -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn ensure_macos() -> Result<(), DaemonError> {
    Err(DaemonError::Launchd(
        "launchd agents are only available on macOS".to_string(),
    ))
}

fn launchctl(args: &[&str], ignore_failure: bool) -> Result<(), DaemonError> {
    let output = Command::new("launchctl")
        .args(args)
        .output()
        .map_err(|e| io_err("launchctl", e))?;
    if output.status.success() || ignore_failure {
        return Ok(());
    }
    Err(DaemonError::Launchd(format!(
        "launchctl {} failed ({}): {}",
        args.first().copied().unwrap_or_default(),
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    )))
}

fn launchctl_domain() -> Result<String, DaemonError> {
    let output = Command::new("id")
        .arg("-u")
        .output()
        .map_err(|e| io_err("id -u", e))?;
    let uid = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || uid.is_empty() {
        return Err(DaemonError::Launchd(format!(
            "could not determine the current uid ({})",
            output.status
        )));
    }
    Ok(format!("gui/{uid}"))
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
