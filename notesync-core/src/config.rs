//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.notesync/
//!   config.yaml   (mode 0600, directory 0700)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable overriding [`Config::database_url`].
pub const ENV_DATABASE_URL: &str = "NOTESYNC_DATABASE_URL";
/// Legacy name for the database URL, still honoured.
pub const ENV_LEGACY_DATABASE_URL: &str = "FIREBASE_DATABASE_URL";
/// Environment variable overriding [`Config::interval_secs`].
pub const ENV_INTERVAL_SECS: &str = "NOTESYNC_INTERVAL_SECS";

const RESERVED_PATH_CHARS: [char; 5] = ['.', '#', '$', '[', ']'];

/// Runtime configuration for one sync installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the realtime database, e.g. `https://my-notes.firebaseio.com`.
    pub database_url: String,
    /// Namespace holding one child per note.
    #[serde(default = "default_notes_path")]
    pub notes_path: String,
    /// Namespace holding [`crate::SyncMetadata`].
    #[serde(default = "default_metadata_path")]
    pub metadata_path: String,
    /// Seconds between scheduled runs.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Note count used when the source cannot report one.
    #[serde(default = "default_note_count")]
    pub default_note_count: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Program that runs the per-window script.
    #[serde(default = "default_source_command")]
    pub source_command: String,
    /// Skip deletions for a run in which any window failed to read. Off by
    /// default: a failed window's notes are deleted remotely like any other
    /// unseen note.
    #[serde(default)]
    pub hold_deletions_on_partial_fetch: bool,
}

fn default_notes_path() -> String {
    "notes".to_string()
}
fn default_metadata_path() -> String {
    "metadata".to_string()
}
fn default_interval_secs() -> u64 {
    300
}
fn default_note_count() -> usize {
    1134
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_source_command() -> String {
    "osascript".to_string()
}

impl Config {
    /// A config with every field defaulted except the database URL.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            notes_path: default_notes_path(),
            metadata_path: default_metadata_path(),
            interval_secs: default_interval_secs(),
            default_note_count: default_note_count(),
            request_timeout_secs: default_request_timeout_secs(),
            source_command: default_source_command(),
            hold_deletions_on_partial_fetch: false,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`load_at`]).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL).or_else(|| lookup(ENV_LEGACY_DATABASE_URL)) {
            self.database_url = url;
        }
        if let Some(raw) = lookup(ENV_INTERVAL_SECS) {
            self.interval_secs = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "interval_secs",
                reason: format!("{ENV_INTERVAL_SECS}={raw} is not a whole number of seconds"),
            })?;
        }
        Ok(())
    }

    /// Check every field; the first failure is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.database_url.trim();
        if url.is_empty() {
            return Err(ConfigError::Invalid {
                field: "database_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::Invalid {
                field: "database_url",
                reason: format!("'{url}' must start with http:// or https://"),
            });
        }
        validate_namespace("notes_path", &self.notes_path)?;
        validate_namespace("metadata_path", &self.metadata_path)?;
        if self.notes_path == self.metadata_path {
            return Err(ConfigError::Invalid {
                field: "metadata_path",
                reason: "must differ from notes_path".to_string(),
            });
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.source_command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "source_command",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn validate_namespace(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if let Some(c) = trimmed.chars().find(|c| RESERVED_PATH_CHARS.contains(c)) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("'{value}' contains reserved character '{c}'"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.notesync/`
pub fn notesync_root(home: &Path) -> PathBuf {
    home.join(".notesync")
}

/// `<home>/.notesync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    notesync_root(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load, apply environment overrides, and validate.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let mut config = read_at(home)?;
    config.apply_overrides(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Read the file as written, without overrides or validation.
pub fn read_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save to `<home>/.notesync/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    let dir = notesync_root(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Write a default config pointing at `database_url`.
///
/// Idempotent: if the file already exists, loads and returns it unchanged.
pub fn init_at(home: &Path, database_url: &str) -> Result<Config, ConfigError> {
    if config_path_at(home).exists() {
        return read_at(home);
    }
    let config = Config::new(database_url.trim());
    config.validate()?;
    save_at(home, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init(database_url: &str) -> Result<Config, ConfigError> {
    init_at(&home()?, database_url)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
