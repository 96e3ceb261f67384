//! Size-based rotation of the daemon's launchd log files.
//!
//! launchd appends the daemon's stdout and stderr to fixed paths forever, so
//! the daemon trims them itself: once a file reaches the size limit it
//! becomes `<name>.1`, older copies shift up by one, and the oldest beyond
//! the keep count is removed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotate once a log file reaches this many bytes (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated copies kept per log file.
pub const MAX_ROTATED_FILES: usize = 5;

/// When to rotate and how much history to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub keep: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_LOG_BYTES,
            keep: MAX_ROTATED_FILES,
        }
    }
}

/// Rotate `log_path` if it has reached the policy size. Returns whether a
/// rotation happened; a missing file is not an error.
pub fn rotate_if_needed(log_path: &Path, policy: RotationPolicy) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < policy.max_bytes || policy.keep == 0 {
        return Ok(false);
    }

    remove_if_present(&rotated_path(log_path, policy.keep))?;
    for n in (1..policy.keep).rev() {
        let from = rotated_path(log_path, n);
        if from.exists() {
            fs::rename(&from, rotated_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, rotated_path(log_path, 1))?;

    // launchd keeps its descriptor on the renamed file; recreate the path so
    // `notesync daemon logs` has something to read.
    fs::File::create(log_path)?;
    Ok(true)
}

/// Rotate the daemon's stdout and stderr logs under `home`.
pub fn rotate_logs(home: &Path) {
    let policy = RotationPolicy::default();
    for log_path in [
        crate::paths::stdout_log_path(home),
        crate::paths::stderr_log_path(home),
    ] {
        match rotate_if_needed(&log_path, policy) {
            Ok(true) => tracing::info!(path = %log_path.display(), "rotated log file"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
}

fn rotated_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
