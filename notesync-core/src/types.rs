//! Domain types shared by the sync engine, daemon and CLI.
//!
//! Field names on the wire match what the notes web front-end reads
//! (`created_date`, `updated_date`, `last_synced`), so the Rust names and the
//! stored names differ for the three timestamp fields.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Title given to a note whose source block carried no title line.
pub const UNTITLED: &str = "Untitled";

/// Characters the remote store reserves in key paths.
const RESERVED_KEY_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

/// Replacement for reserved characters in storage keys.
const KEY_REPLACEMENT: char = '_';

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// The sanitized identifier that addresses a record in the store's flat
/// namespace.
///
/// The mapping from note id is lossy: `a/b` and `a.b` both become `a_b`.
/// Collisions inside one run are resolved by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageKey(pub String);

impl StorageKey {
    /// Derive the storage key for a note id.
    pub fn from_id(id: &str) -> Self {
        Self(
            id.chars()
                .map(|c| {
                    if RESERVED_KEY_CHARS.contains(&c) {
                        KEY_REPLACEMENT
                    } else {
                        c
                    }
                })
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for StorageKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StorageKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One note, as parsed from the source and as stored remotely.
///
/// Every field is a plain string. Deserializing a stored entry coerces
/// missing or `null` fields to `""`, so a record read back from the store
/// always has all keys present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: String,
    #[serde(rename = "created_date", default, deserialize_with = "null_as_empty")]
    pub created_at: String,
    #[serde(rename = "updated_date", default, deserialize_with = "null_as_empty")]
    pub updated_at: String,
    /// When the note was last observed from the source (not last stored).
    #[serde(rename = "last_synced", default, deserialize_with = "null_as_empty")]
    pub synced_at: String,
}

impl Record {
    pub fn storage_key(&self) -> StorageKey {
        StorageKey::from_id(&self.id)
    }
}

/// Summary written to the store's metadata namespace after every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub last_sync: String,
    #[serde(default)]
    pub note_count: usize,
    #[serde(default)]
    pub deleted_count: usize,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
