//! Windowed fetching from the note source.
//!
//! The source is asked for fixed-size windows of notes, one invocation at a
//! time. A window that fails is skipped for this run; the others still
//! contribute their records, concatenated in window order.

use std::thread::sleep;
use std::time::Duration;

use notesync_core::Record;

use crate::error::SourceError;
use crate::parser::parse_notes;
use crate::source::{NoteSource, BATCH_END, BATCH_START};

/// Notes requested per source invocation.
pub const WINDOW_SIZE: usize = 50;

/// Pause between consecutive source invocations.
pub const WINDOW_DELAY: Duration = Duration::from_secs(1);

/// A 1-based inclusive range of note indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

/// Split `1..=total` into windows of `size`, the last one clamped to `total`.
pub fn windows(total: usize, size: usize) -> Vec<Window> {
    let size = size.max(1);
    (1..=total)
        .step_by(size)
        .map(|start| Window {
            start,
            end: (start + size - 1).min(total),
        })
        .collect()
}

/// Records gathered by one fetch, plus which windows were lost.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<Record>,
    pub windows: usize,
    pub failed_windows: Vec<Window>,
}

impl FetchOutcome {
    /// True when every window produced usable output.
    pub fn is_complete(&self) -> bool {
        self.failed_windows.is_empty()
    }
}

/// Drives a [`NoteSource`] window by window.
pub struct BatchFetcher<'a, S: NoteSource + ?Sized> {
    source: &'a S,
    window_size: usize,
    delay: Duration,
}

impl<'a, S: NoteSource + ?Sized> BatchFetcher<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            window_size: WINDOW_SIZE,
            delay: WINDOW_DELAY,
        }
    }

    /// Override the pause between windows (tests use zero).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Ask the source for its note count, falling back to `default`.
    pub fn note_count_or(&self, default: usize) -> usize {
        match self.source.note_count() {
            Ok(count) => {
                tracing::info!("found {count} note(s) in the source");
                count
            }
            Err(err) => {
                tracing::warn!("could not count notes ({err}); assuming {default}");
                default
            }
        }
    }

    /// Fetch and parse every window covering `1..=total`.
    pub fn fetch_all(&self, total: usize) -> FetchOutcome {
        let plan = windows(total, self.window_size);
        let mut outcome = FetchOutcome {
            windows: plan.len(),
            ..FetchOutcome::default()
        };

        for (index, window) in plan.iter().enumerate() {
            if index > 0 && !self.delay.is_zero() {
                sleep(self.delay);
            }
            tracing::info!("processing notes {} to {}", window.start, window.end);
            match self.fetch_window(*window) {
                Ok(records) => {
                    tracing::info!(
                        "parsed {} note(s) from window {}-{}",
                        records.len(),
                        window.start,
                        window.end
                    );
                    outcome.records.extend(records);
                }
                Err(err) => {
                    tracing::warn!("skipping window {}-{}: {err}", window.start, window.end);
                    outcome.failed_windows.push(*window);
                }
            }
        }
        outcome
    }

    fn fetch_window(&self, window: Window) -> Result<Vec<Record>, SourceError> {
        let output = self.source.fetch_window(window.start, window.end)?;
        if !(output.contains(BATCH_START) && output.contains(BATCH_END)) {
            return Err(SourceError::MissingMarkers {
                start: window.start,
                end: window.end,
            });
        }
        Ok(parse_notes(&output))
    }
}
