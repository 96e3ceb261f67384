//! notesync core library: domain types, configuration, errors.
//!
//! - [`types`]: records, storage keys and sync metadata
//! - [`timestamp`]: source date conversion
//! - [`config`]: load / save / init of `~/.notesync/config.yaml`
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod timestamp;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use types::{Record, StorageKey, SyncMetadata, UNTITLED};
