//! Fixed-interval driver for sync runs.
//!
//! The first run starts immediately, then one run per interval tick. A run
//! is awaited before the next tick is considered, so runs never overlap. A
//! run that outlasts the interval is logged as an overrun and the ticks it
//! covered are skipped rather than replayed back to back.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use notesync_sync::{RunReport, SyncError};

/// One sync run. Called on a blocking thread.
pub type SyncJob = Arc<dyn Fn() -> Result<RunReport, SyncError> + Send + Sync>;

/// Totals over the scheduler's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub runs: usize,
    /// Runs that returned an error or panicked.
    pub failed: usize,
    /// Runs that took longer than the interval.
    pub overruns: usize,
}

/// Run `job` every `interval` until `shutdown_rx` fires.
///
/// Shutdown is observed between runs; a run in progress is allowed to
/// finish.
pub async fn run_every(
    interval: Duration,
    job: SyncJob,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> SchedulerStats {
    let mut stats = SchedulerStats::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = interval.as_secs(), "scheduler started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {}
        }

        let started = Instant::now();
        let job = Arc::clone(&job);
        let result = tokio::task::spawn_blocking(move || job()).await;
        let elapsed = started.elapsed();
        stats.runs += 1;

        match result {
            Ok(Ok(report)) => log_report(&report, elapsed),
            Ok(Err(err)) => {
                stats.failed += 1;
                tracing::error!(error = %err, "sync run failed");
            }
            Err(err) => {
                stats.failed += 1;
                tracing::error!(error = %err, "sync run aborted");
            }
        }

        if elapsed > interval {
            stats.overruns += 1;
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "sync run took longer than the interval; skipping missed ticks"
            );
        }
    }

    tracing::info!(runs = stats.runs, failed = stats.failed, "scheduler stopped");
    stats
}

fn log_report(report: &RunReport, elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis() as u64;
    if report.skipped {
        tracing::info!(elapsed_ms, "sync run found no notes; store left untouched");
        return;
    }
    tracing::info!(
        observed = report.observed,
        new = report.new,
        updated = report.updated,
        deleted = report.to_delete,
        failures = report.failures(),
        elapsed_ms,
        "sync run finished"
    );
    if report.failed_windows > 0 {
        tracing::warn!(
            failed_windows = report.failed_windows,
            deletions_suppressed = report.deletions_suppressed,
            "some notes could not be read this run"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use notesync_sync::StoreError;

    use super::*;

    const INTERVAL: Duration = Duration::from_secs(300);

    fn counting_job(counter: Arc<AtomicUsize>) -> SyncJob {
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(RunReport::default())
        })
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn first_run_is_immediate_then_one_per_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_every(INTERVAL, counting_job(counter.clone()), shutdown_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::sleep(INTERVAL * 2).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        shutdown_tx.send(()).expect("send shutdown");
        let stats = handle.await.expect("join");
        assert_eq!(stats.runs, 3);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn failing_runs_do_not_stop_the_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let job: SyncJob = {
            let calls = calls.clone();
            Arc::new(move || {
                if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                    Err(SyncError::Store(StoreError::Transport {
                        method: "GET",
                        url: "https://example.firebaseio.com/notes.json".to_string(),
                        message: "timed out".to_string(),
                    }))
                } else {
                    Ok(RunReport::default())
                }
            })
        };
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_every(INTERVAL, job, shutdown_rx));

        tokio::time::sleep(INTERVAL * 3 + Duration::from_secs(1)).await;
        shutdown_tx.send(()).expect("send shutdown");
        let stats = handle.await.expect("join");
        assert_eq!(stats.runs, 4);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn panicking_run_is_contained() {
        let calls = Arc::new(AtomicUsize::new(0));
        let job: SyncJob = {
            let calls = calls.clone();
            Arc::new(move || {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first run explodes");
                }
                Ok(RunReport::default())
            })
        };
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_every(INTERVAL, job, shutdown_rx));

        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        shutdown_tx.send(()).expect("send shutdown");
        let stats = handle.await.expect("join");
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_runs_never_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let job: SyncJob = {
            let (active, peak) = (active.clone(), peak.clone());
            Arc::new(move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(120));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(RunReport::default())
            })
        };
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_every(Duration::from_millis(50), job, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown_tx.send(()).expect("send shutdown");
        let stats = handle.await.expect("join");

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(stats.runs >= 2, "got {stats:?}");
        assert_eq!(stats.overruns, stats.runs);
    }
}
