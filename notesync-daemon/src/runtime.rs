use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use notesync_core::{config, Config};
use notesync_sync::{FirebaseStore, OsascriptSource, RunOptions};

use crate::error::{io_err, DaemonError};
use crate::scheduler::{run_every, SchedulerStats, SyncJob};

const LOG_ROTATION_INTERVAL: Duration = Duration::from_secs(5);

/// Set to `json` for one JSON object per log line.
pub const ENV_LOG_FORMAT: &str = "NOTESYNC_LOG_FORMAT";

/// Start the daemon and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon: load config, check the store answers, then sync on a
/// fixed interval until ctrl-c.
///
/// Any failure before the first run is returned; after that the daemon only
/// stops on a signal.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let config = config::load_at(&home)?;
    tracing::info!(
        database = %config.database_url,
        interval_secs = config.interval_secs,
        "starting notesync daemon"
    );

    let store = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || FirebaseStore::connect(&config))
            .await
            .map_err(|err| DaemonError::Task("store probe", err.to_string()))??
    };
    let job = sync_job(&config, store);

    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let interval = config.interval();
        tokio::spawn(async move {
            let stats = run_every(interval, job, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            stats
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move { log_rotation_task(home, shutdown.subscribe()).await })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, stopping after the current run");
                        let _ = shutdown.send(());
                        Ok(())
                    }
                    Err(err) => {
                        let _ = shutdown.send(());
                        Err(DaemonError::Task("signal handler", err.to_string()))
                    }
                },
            }
        })
    };

    let (scheduler_result, rotation_result, signal_result) =
        tokio::join!(scheduler_handle, rotation_handle, signal_handle);

    let stats: SchedulerStats =
        scheduler_result.map_err(|err| DaemonError::Task("scheduler", err.to_string()))?;
    rotation_result.map_err(|err| DaemonError::Task("log rotation", err.to_string()))?;
    signal_result.map_err(|err| DaemonError::Task("signal handler", err.to_string()))??;

    tracing::info!(runs = stats.runs, failed = stats.failed, "notesync daemon stopped");
    Ok(())
}

/// One full pipeline run against the live source and store.
fn sync_job(config: &Config, store: FirebaseStore) -> SyncJob {
    let source = OsascriptSource::new(config.source_command.clone());
    let options = RunOptions::from_config(config);
    Arc::new(move || notesync_sync::run(&source, &store, &options))
}

async fn log_rotation_task(home: PathBuf, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(LOG_ROTATION_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick is immediate; nothing has been logged yet.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                // Failures are logged inside rotate_logs.
                let _ = tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&home);
                })
                .await;
            }
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let logs = crate::paths::logs_dir(home);
    fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(ENV_LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt().with_env_filter(filter).with_target(false).json().try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_config_is_fatal() {
        let home = TempDir::new().expect("home");
        let err = run(home.path().to_path_buf()).await.unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)), "got {err:?}");
        assert!(crate::paths::logs_dir(home.path()).is_dir());
    }

    #[tokio::test]
    async fn unreachable_store_is_fatal() {
        let home = TempDir::new().expect("home");
        // Nothing listens on port 9 of localhost; the probe fails fast.
        config::init_at(home.path(), "http://127.0.0.1:9").expect("init config");
        let err = run(home.path().to_path_buf()).await.unwrap_err();
        assert!(matches!(err, DaemonError::Store(_)), "got {err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_task_stops_on_shutdown() {
        let home = TempDir::new().expect("home");
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(log_rotation_task(home.path().to_path_buf(), rx));
        tokio::time::sleep(LOG_ROTATION_INTERVAL * 3).await;
        tx.send(()).expect("send");
        handle.await.expect("join");
    }
}
