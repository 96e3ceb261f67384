//! Error types for notesync-sync.

use thiserror::Error;

use notesync_core::error::ConfigError;

/// Failure invoking the external note source for one window or count probe.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source program could not be started or its output not collected.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The source exited unsuccessfully.
    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: String,
        stderr: String,
    },

    /// The output is missing the batch start or end marker.
    #[error("window {start}-{end} output is missing batch markers")]
    MissingMarkers { start: usize, end: usize },

    /// The count probe printed something other than an integer.
    #[error("note count output '{output}' is not a number")]
    BadCount { output: String },
}

/// Failure talking to the remote store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store answered with a non-success HTTP status.
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("{method} {url} failed: {message}")]
    Transport {
        method: &'static str,
        url: String,
        message: String,
    },

    /// A payload could not be encoded, or a response decoded.
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A response body could not be read.
    #[error("failed reading response from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Unrecoverable errors of one pipeline run.
///
/// Recoverable failures (a window, a batch, an item, the metadata write) are
/// logged and counted in the run's report instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Reading the stored baseline failed; nothing was written.
    #[error("could not read stored notes: {0}")]
    Store(#[from] StoreError),
}

/// Convenience constructor for [`StoreError::Transport`] and
/// [`StoreError::Status`] from a `ureq` failure.
pub(crate) fn store_err(method: &'static str, url: &str, err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Status(status, response) => StoreError::Status {
            method,
            url: url.to_string(),
            status,
            body: response
                .into_string()
                .unwrap_or_else(|e| format!("<unreadable body: {e}>")),
        },
        ureq::Error::Transport(transport) => StoreError::Transport {
            method,
            url: url.to_string(),
            message: transport.to_string(),
        },
    }
}
