//! Applies a [`Delta`] to the remote store.
//!
//! ## Write protocol
//!
//! 1. Upserts go out in batches of [`UPSERT_BATCH_SIZE`], one multi-key
//!    update per batch.
//! 2. A batch that fails to encode or to write is retried one record at a
//!    time, so only the records that fail on their own are lost.
//! 3. Deletions go out one key per call, grouped into batches of
//!    [`DELETE_BATCH_SIZE`] for pacing.
//! 4. The metadata document is written last, even when steps 1-3 had
//!    failures. A metadata failure is logged and reported, never raised.

use std::thread::sleep;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use notesync_core::{StorageKey, SyncMetadata};

use crate::error::StoreError;
use crate::reconcile::Delta;
use crate::store::RemoteStore;

pub const UPSERT_BATCH_SIZE: usize = 30;
pub const DELETE_BATCH_SIZE: usize = 20;
pub const UPSERT_BATCH_DELAY: Duration = Duration::from_millis(1500);
pub const DELETE_ITEM_DELAY: Duration = Duration::from_millis(100);
pub const DELETE_BATCH_DELAY: Duration = Duration::from_secs(1);

/// Batch sizes and pacing for one [`SyncDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    pub upsert_batch_size: usize,
    pub delete_batch_size: usize,
    pub upsert_batch_delay: Duration,
    pub delete_item_delay: Duration,
    pub delete_batch_delay: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            upsert_batch_size: UPSERT_BATCH_SIZE,
            delete_batch_size: DELETE_BATCH_SIZE,
            upsert_batch_delay: UPSERT_BATCH_DELAY,
            delete_item_delay: DELETE_ITEM_DELAY,
            delete_batch_delay: DELETE_BATCH_DELAY,
        }
    }
}

impl DriverSettings {
    /// Default batch sizes with every delay set to zero.
    pub fn without_delays() -> Self {
        Self {
            upsert_batch_delay: Duration::ZERO,
            delete_item_delay: Duration::ZERO,
            delete_batch_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened to a list of writes or deletions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<StorageKey>,
}

impl ApplyOutcome {
    fn ok(&mut self, count: usize) {
        self.attempted += count;
        self.succeeded += count;
    }

    fn fail(&mut self, key: StorageKey) {
        self.attempted += 1;
        self.failed.push(key);
    }
}

/// Result of [`SyncDriver::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub upserts: ApplyOutcome,
    pub deletes: ApplyOutcome,
    pub metadata_written: bool,
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct SyncDriver<'a, R: RemoteStore + ?Sized> {
    store: &'a R,
    settings: DriverSettings,
}

impl<'a, R: RemoteStore + ?Sized> SyncDriver<'a, R> {
    pub fn new(store: &'a R, settings: DriverSettings) -> Self {
        Self { store, settings }
    }

    /// Apply `delta`, then record `metadata`.
    pub fn apply(&self, delta: &Delta, metadata: &SyncMetadata) -> ApplyReport {
        let items: Vec<(StorageKey, _)> = delta
            .to_upsert
            .iter()
            .map(|u| (u.key.clone(), &u.record))
            .collect();
        let upserts = self.apply_upserts(&items);
        let deletes = self.apply_deletes(&delta.to_delete);
        let metadata_written = self.write_metadata(metadata);
        ApplyReport {
            upserts,
            deletes,
            metadata_written,
        }
    }

    /// Write `items` in batches, falling back to per-item writes for any
    /// batch that fails.
    pub fn apply_upserts<T: Serialize>(&self, items: &[(StorageKey, T)]) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        if items.is_empty() {
            return outcome;
        }
        let size = self.settings.upsert_batch_size.max(1);
        let total = items.len().div_ceil(size);

        for (index, batch) in items.chunks(size).enumerate() {
            if index > 0 {
                pause(self.settings.upsert_batch_delay);
            }
            tracing::info!(
                "updating batch {}/{} ({} note(s))",
                index + 1,
                total,
                batch.len()
            );
            match self.write_batch(batch) {
                Ok(()) => outcome.ok(batch.len()),
                Err(err) => {
                    tracing::warn!(
                        "batch {}/{} failed ({err}); retrying one note at a time",
                        index + 1,
                        total
                    );
                    for item in batch {
                        match self.write_batch(std::slice::from_ref(item)) {
                            Ok(()) => outcome.ok(1),
                            Err(err) => {
                                tracing::error!("failed to update note '{}': {err}", item.0);
                                outcome.fail(item.0.clone());
                            }
                        }
                    }
                }
            }
        }
        outcome
    }

    /// Delete `keys` one at a time, continuing past failures.
    pub fn apply_deletes(&self, keys: &[StorageKey]) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        if keys.is_empty() {
            return outcome;
        }
        let size = self.settings.delete_batch_size.max(1);
        let total = keys.len().div_ceil(size);

        for (index, batch) in keys.chunks(size).enumerate() {
            if index > 0 {
                pause(self.settings.delete_batch_delay);
            }
            tracing::info!("processing deletion batch {}/{}", index + 1, total);
            for key in batch {
                match self.store.delete(key) {
                    Ok(()) => {
                        tracing::debug!("deleted note '{key}'");
                        outcome.ok(1);
                    }
                    Err(err) => {
                        tracing::error!("failed to delete note '{key}': {err}");
                        outcome.fail(key.clone());
                    }
                }
                pause(self.settings.delete_item_delay);
            }
        }
        outcome
    }

    /// Write the metadata document. Returns whether the write succeeded.
    pub fn write_metadata(&self, metadata: &SyncMetadata) -> bool {
        let result = match serde_json::to_value(metadata) {
            Ok(Value::Object(fields)) => self.store.update_metadata(&fields),
            Ok(other) => {
                tracing::error!("metadata encoded as {other}, expected an object");
                return false;
            }
            Err(err) => Err(StoreError::from(err)),
        };
        match result {
            Ok(()) => {
                tracing::info!(
                    "recorded sync metadata: {} note(s), {} deletion(s)",
                    metadata.note_count,
                    metadata.deleted_count
                );
                true
            }
            Err(err) => {
                tracing::error!("failed to write sync metadata: {err}");
                false
            }
        }
    }

    fn write_batch<T: Serialize>(&self, batch: &[(StorageKey, T)]) -> Result<(), StoreError> {
        let entries = batch
            .iter()
            .map(|(key, value)| -> Result<(String, Value), serde_json::Error> {
                Ok((key.0.clone(), serde_json::to_value(value)?))
            })
            .collect::<Result<Map<String, Value>, _>>()?;
        self.store.update_many(&entries)
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay);
    }
}
