//! One sync run, shared by `notesync sync` and the daemon.
//!
//! count → fetch → normalize → read stored → reconcile → apply.
//!
//! Only a failure to read the stored baseline aborts the run, and it aborts
//! before anything is written. Every later failure is logged and counted in
//! the [`RunReport`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use notesync_core::{timestamp, Config, Record, StorageKey, SyncMetadata};

use crate::driver::{ApplyReport, DriverSettings, SyncDriver};
use crate::error::{StoreError, SyncError};
use crate::fetcher::{BatchFetcher, WINDOW_DELAY};
use crate::normalize::normalize;
use crate::reconcile::reconcile;
use crate::source::NoteSource;
use crate::store::RemoteStore;

/// Knobs for one [`run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Note count assumed when the source cannot be counted.
    pub default_note_count: usize,
    pub window_delay: Duration,
    pub driver: DriverSettings,
    /// Compute and report the delta without writing anything.
    pub dry_run: bool,
    /// Drop the run's deletions when any window failed.
    pub hold_deletions_on_partial_fetch: bool,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_note_count: config.default_note_count,
            window_delay: WINDOW_DELAY,
            driver: DriverSettings::default(),
            dry_run: false,
            hold_deletions_on_partial_fetch: config.hold_deletions_on_partial_fetch,
        }
    }

    /// Same options with every pause removed.
    pub fn without_delays(mut self) -> Self {
        self.window_delay = Duration::ZERO;
        self.driver = DriverSettings::without_delays();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Notes parsed from the source, before de-duplication.
    pub observed: usize,
    pub windows: usize,
    pub failed_windows: usize,
    pub new: usize,
    pub updated: usize,
    pub to_delete: usize,
    /// Stale keys left alone because part of the source could not be read
    /// and `hold_deletions_on_partial_fetch` is set.
    pub deletions_suppressed: usize,
    pub dry_run: bool,
    /// True when the source yielded nothing and the store was not touched.
    pub skipped: bool,
    /// `None` for dry runs and skipped runs.
    pub applied: Option<ApplyReport>,
}

impl RunReport {
    /// Writes or deletions that failed, plus a failed metadata write.
    pub fn failures(&self) -> usize {
        self.applied.as_ref().map_or(0, |a| {
            a.upserts.failed.len() + a.deletes.failed.len() + usize::from(!a.metadata_written)
        })
    }
}

/// Run one full sync of `source` into `store`.
pub fn run<S, R>(source: &S, store: &R, options: &RunOptions) -> Result<RunReport, SyncError>
where
    S: NoteSource + ?Sized,
    R: RemoteStore + ?Sized,
{
    let fetcher = BatchFetcher::new(source).with_delay(options.window_delay);
    let total = fetcher.note_count_or(options.default_note_count);
    let fetched = fetcher.fetch_all(total);

    let mut report = RunReport {
        observed: fetched.records.len(),
        windows: fetched.windows,
        failed_windows: fetched.failed_windows.len(),
        dry_run: options.dry_run,
        ..RunReport::default()
    };

    if fetched.records.is_empty() {
        tracing::info!("no notes to update; leaving the store untouched");
        report.skipped = true;
        return Ok(report);
    }

    let records: Vec<Record> = fetched.records.into_iter().map(normalize).collect();
    let stored = load_stored(store)?;
    let mut delta = reconcile(records, &stored);

    if !fetched.failed_windows.is_empty() {
        tracing::warn!(
            "{} of {} window(s) failed; their notes count as unseen this run",
            fetched.failed_windows.len(),
            fetched.windows
        );
    }
    if options.hold_deletions_on_partial_fetch
        && !fetched.failed_windows.is_empty()
        && !delta.to_delete.is_empty()
    {
        tracing::warn!(
            "holding back {} deletion(s) until every window reads",
            delta.to_delete.len()
        );
        report.deletions_suppressed = delta.to_delete.len();
        delta.to_delete.clear();
    }

    report.new = delta.new_count();
    report.updated = delta.updated_count();
    report.to_delete = delta.to_delete.len();
    tracing::info!(
        "{} new, {} updated, {} to delete ({} stored)",
        report.new,
        report.updated,
        report.to_delete,
        stored.len()
    );

    if options.dry_run {
        tracing::info!("[dry-run] no changes written");
        return Ok(report);
    }

    let metadata = SyncMetadata {
        last_sync: timestamp::now_iso(),
        note_count: report.observed,
        deleted_count: report.to_delete,
    };
    let applied = SyncDriver::new(store, options.driver.clone()).apply(&delta, &metadata);
    report.applied = Some(applied);
    Ok(report)
}

/// Read every stored entry as a [`Record`].
///
/// An entry that is not a JSON object is kept as an empty record, so it is
/// rewritten if the source still has it and deleted otherwise.
pub fn load_stored<R: RemoteStore + ?Sized>(
    store: &R,
) -> Result<BTreeMap<StorageKey, Record>, StoreError> {
    let entries = store.fetch_all()?;
    Ok(entries
        .into_iter()
        .map(|(key, value)| {
            let record = serde_json::from_value(value).unwrap_or_else(|err| {
                tracing::warn!("stored entry '{key}' is malformed ({err}); treating as empty");
                Record::default()
            });
            (StorageKey(key), record)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use serde_json::{json, Map, Value};

    use super::*;
    use crate::error::SourceError;
    use crate::source::{BATCH_END, BATCH_START};

    /// Source serving the given `(id, updated)` notes; the window starting
    /// at `broken_window` fails.
    struct ListSource {
        notes: Vec<(String, String)>,
        broken_window: Option<usize>,
    }

    impl ListSource {
        fn new(notes: &[(&str, &str)]) -> Self {
            Self {
                notes: notes
                    .iter()
                    .map(|(id, updated)| (id.to_string(), updated.to_string()))
                    .collect(),
                broken_window: None,
            }
        }
    }

    impl NoteSource for ListSource {
        fn note_count(&self) -> Result<usize, SourceError> {
            Ok(self.notes.len())
        }

        fn fetch_window(&self, start: usize, end: usize) -> Result<String, SourceError> {
            if self.broken_window == Some(start) {
                return Err(SourceError::MissingMarkers { start, end });
            }
            let mut out = format!("{BATCH_START}\n");
            for i in start..=end.min(self.notes.len()) {
                let (id, updated) = &self.notes[i - 1];
                out.push_str(&format!(
                    "------- Note {i} -------\nTitle: note {i}\nID: {id}\nBody: text\nDate Created: 2024-01-01 00:00:00\nDate Updated: {updated}\n----------------\n"
                ));
            }
            out.push_str(BATCH_END);
            Ok(out)
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        notes: RefCell<BTreeMap<String, Value>>,
        metadata: RefCell<Option<Map<String, Value>>>,
        writes: Cell<usize>,
        unreadable: bool,
    }

    impl MemoryStore {
        fn with(entries: &[(&str, &str)]) -> Self {
            let store = Self::default();
            for (id, updated) in entries {
                store.notes.borrow_mut().insert(
                    StorageKey::from_id(id).0,
                    json!({ "id": id, "updated_date": updated }),
                );
            }
            store
        }
    }

    impl RemoteStore for MemoryStore {
        fn fetch_all(&self) -> Result<BTreeMap<String, Value>, StoreError> {
            if self.unreadable {
                return Err(StoreError::Transport {
                    method: "GET",
                    url: "memory://notes".to_string(),
                    message: "connection refused".to_string(),
                });
            }
            Ok(self.notes.borrow().clone())
        }

        fn update_many(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
            self.writes.set(self.writes.get() + 1);
            let mut notes = self.notes.borrow_mut();
            for (key, value) in entries {
                notes.insert(key.clone(), value.clone());
            }
            Ok(())
        }

        fn delete(&self, key: &StorageKey) -> Result<(), StoreError> {
            self.writes.set(self.writes.get() + 1);
            self.notes.borrow_mut().remove(key.as_str());
            Ok(())
        }

        fn update_metadata(&self, fields: &Map<String, Value>) -> Result<(), StoreError> {
            self.writes.set(self.writes.get() + 1);
            *self.metadata.borrow_mut() = Some(fields.clone());
            Ok(())
        }

        fn fetch_metadata(&self) -> Result<Option<SyncMetadata>, StoreError> {
            Ok(None)
        }
    }

    fn options() -> RunOptions {
        RunOptions::from_config(&Config::new("https://example.firebaseio.com")).without_delays()
    }

    #[test]
    fn first_run_creates_every_note_and_metadata() {
        let source = ListSource::new(&[("p1", "2024-01-02 00:00:00"), ("p2", "2024-01-03 00:00:00")]);
        let store = MemoryStore::default();
        let report = run(&source, &store, &options()).expect("run");

        assert_eq!(report.new, 2);
        assert_eq!(report.failures(), 0);
        let notes = store.notes.borrow();
        assert_eq!(notes["p1"]["updated_date"], "2024-01-02T00:00:00Z");
        assert_eq!(notes["p2"]["title"], "note 2");
        let metadata = store.metadata.borrow().clone().expect("metadata");
        assert_eq!(metadata["note_count"], 2);
        assert_eq!(metadata["deleted_count"], 0);
    }

    #[test]
    fn vanished_note_is_deleted() {
        let source = ListSource::new(&[("p1", "2024-01-02 00:00:00")]);
        let store = MemoryStore::with(&[("p1", "2024-01-02T00:00:00Z"), ("gone", "T0")]);
        let report = run(&source, &store, &options()).expect("run");

        assert_eq!(report.new + report.updated, 0);
        assert_eq!(report.to_delete, 1);
        assert!(!store.notes.borrow().contains_key("gone"));
        let metadata = store.metadata.borrow().clone().expect("metadata");
        assert_eq!(metadata["deleted_count"], 1);
    }

    #[test]
    fn empty_source_leaves_store_untouched() {
        let source = ListSource::new(&[]);
        let store = MemoryStore::with(&[("p1", "T1")]);
        let report = run(&source, &store, &options()).expect("run");

        assert!(report.skipped);
        assert_eq!(store.writes.get(), 0);
        assert!(store.notes.borrow().contains_key("p1"));
        assert!(store.metadata.borrow().is_none());
    }

    /// Sixty notes, all stored, plus a stale `gone`; the window 51..=60 fails.
    fn sixty_notes_with_broken_last_window() -> (ListSource, MemoryStore) {
        let ids: Vec<String> = (1..=60).map(|i| format!("p{i}")).collect();
        let notes: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), "2024-01-01 00:00:00")).collect();
        let mut source = ListSource::new(&notes);
        source.broken_window = Some(51);
        let mut stored: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), "2024-01-01T00:00:00Z")).collect();
        stored.push(("gone", "T0"));
        (source, MemoryStore::with(&stored))
    }

    #[test]
    fn failed_window_notes_are_deleted_with_stale_keys() {
        let (source, store) = sixty_notes_with_broken_last_window();

        let report = run(&source, &store, &options()).expect("run");
        assert_eq!(report.failed_windows, 1);
        assert_eq!(report.observed, 50);
        assert_eq!(report.to_delete, 11);
        assert_eq!(report.deletions_suppressed, 0);

        let notes = store.notes.borrow();
        assert!(!notes.contains_key("gone"));
        assert!(!notes.contains_key("p55"));
        assert_eq!(notes.len(), 50);
        let metadata = store.metadata.borrow().clone().expect("metadata");
        assert_eq!(metadata["deleted_count"], 11);
    }

    #[test]
    fn holding_deletions_on_partial_fetch_is_opt_in() {
        let (source, store) = sixty_notes_with_broken_last_window();
        let mut options = options();
        options.hold_deletions_on_partial_fetch = true;

        let report = run(&source, &store, &options).expect("run");
        assert_eq!(report.deletions_suppressed, 11);
        assert_eq!(report.to_delete, 0);
        assert!(store.notes.borrow().contains_key("gone"));
        assert_eq!(store.notes.borrow().len(), 61);
    }

    #[test]
    fn unreadable_store_aborts_before_writing() {
        let source = ListSource::new(&[("p1", "2024-01-02 00:00:00")]);
        let store = MemoryStore {
            unreadable: true,
            ..MemoryStore::default()
        };
        let err = run(&source, &store, &options()).unwrap_err();
        assert!(matches!(err, SyncError::Store(_)), "got {err:?}");
        assert_eq!(store.writes.get(), 0);
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let source = ListSource::new(&[("p1", "2024-01-05 00:00:00"), ("p3", "2024-01-01 00:00:00")]);
        let store = MemoryStore::with(&[("p1", "2024-01-02T00:00:00Z"), ("p2", "T")]);
        let report = run(&source, &store, &options().dry_run(true)).expect("run");

        assert_eq!((report.new, report.updated, report.to_delete), (1, 1, 1));
        assert!(report.applied.is_none());
        assert_eq!(store.writes.get(), 0);
    }

    #[test]
    fn malformed_stored_entry_is_rewritten() {
        let source = ListSource::new(&[("p1", "2024-01-02 00:00:00")]);
        let store = MemoryStore::default();
        store
            .notes
            .borrow_mut()
            .insert("p1".to_string(), json!("not an object"));

        let report = run(&source, &store, &options()).expect("run");
        assert_eq!(report.updated, 1);
        assert_eq!(store.notes.borrow()["p1"]["id"], "p1");
    }
}
