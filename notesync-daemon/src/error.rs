use std::path::PathBuf;

use thiserror::Error;

/// Error surface for daemon startup, scheduling and launchd management.
///
/// Everything here is fatal to the daemon. Failures inside a single sync run
/// are logged by the scheduler and never become a `DaemonError`.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] notesync_core::ConfigError),

    #[error("cannot reach the remote store: {0}")]
    Store(#[from] notesync_sync::StoreError),

    #[error("{0} task failed: {1}")]
    Task(&'static str, String),

    #[error("launchd error: {0}")]
    Launchd(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
