//! Delta computation between freshly parsed notes and stored state.
//!
//! Change detection compares `updated_at` as strings and nothing else. An
//! edit that leaves the modification date untouched is not picked up until
//! the date moves; that tolerance is intended.

use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256};

use notesync_core::{Record, StorageKey};

/// Why a record is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// The key is not in the store yet.
    New,
    /// The stored `updated_at` differs from the fresh one.
    Updated,
}

/// One record to write under `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    pub key: StorageKey,
    pub record: Record,
    pub change: Change,
}

/// Writes and deletes needed to bring the store in line with the source.
///
/// A key appears at most once across both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub to_upsert: Vec<Upsert>,
    pub to_delete: Vec<StorageKey>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.to_upsert.is_empty() && self.to_delete.is_empty()
    }

    pub fn new_count(&self) -> usize {
        self.count(Change::New)
    }

    pub fn updated_count(&self) -> usize {
        self.count(Change::Updated)
    }

    fn count(&self, change: Change) -> usize {
        self.to_upsert.iter().filter(|u| u.change == change).count()
    }
}

/// Compute the delta for `fresh` (normalized, in source order) against the
/// `stored` map.
///
/// Two distinct ids that sanitize to the same key keep the plain key for the
/// first one seen; later ones get [`disambiguated_key`]. A repeated id keeps
/// its first record.
pub fn reconcile(fresh: Vec<Record>, stored: &BTreeMap<StorageKey, Record>) -> Delta {
    let mut delta = Delta::default();
    let mut seen: HashMap<StorageKey, String> = HashMap::with_capacity(fresh.len());

    for record in fresh {
        let Some(key) = claim_key(&mut seen, &record) else {
            continue;
        };
        let change = match stored.get(&key) {
            None => Change::New,
            Some(existing) if existing.updated_at != record.updated_at => Change::Updated,
            Some(_) => continue,
        };
        delta.to_upsert.push(Upsert {
            key,
            record,
            change,
        });
    }

    delta.to_delete = stored
        .keys()
        .filter(|key| !seen.contains_key(*key))
        .cloned()
        .collect();
    delta
}

/// Reserve a storage key for `record`, or `None` if its id was already seen.
fn claim_key(seen: &mut HashMap<StorageKey, String>, record: &Record) -> Option<StorageKey> {
    let plain = record.storage_key();
    let Some(owner) = seen.get(&plain).cloned() else {
        seen.insert(plain.clone(), record.id.clone());
        return Some(plain);
    };

    let candidates = [
        disambiguated_key(&plain, &record.id),
        suffixed_key(&plain, &record.id, FULL_DIGEST_HEX),
    ];
    for candidate in candidates {
        if owner == record.id || seen.get(&candidate) == Some(&record.id) {
            tracing::warn!("note id '{}' appears more than once; keeping the first", record.id);
            return None;
        }
        if !seen.contains_key(&candidate) {
            tracing::warn!(
                "note ids '{owner}' and '{}' share storage key '{plain}'; storing the latter as '{candidate}'",
                record.id
            );
            seen.insert(candidate.clone(), record.id.clone());
            return Some(candidate);
        }
    }

    tracing::warn!(
        "note id '{}' has no free storage key near '{plain}'; dropping it this run",
        record.id
    );
    None
}

const SHORT_DIGEST_HEX: usize = 8;
const FULL_DIGEST_HEX: usize = 64;

/// `<key>-<first 8 hex digits of sha256(id)>`.
pub fn disambiguated_key(key: &StorageKey, id: &str) -> StorageKey {
    suffixed_key(key, id, SHORT_DIGEST_HEX)
}

fn suffixed_key(key: &StorageKey, id: &str, digits: usize) -> StorageKey {
    let hex = hex::encode(Sha256::digest(id.as_bytes()));
    StorageKey(format!("{}-{}", key.0, &hex[..digits]))
}
