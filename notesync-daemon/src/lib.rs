//! Background sync daemon: interval scheduler, log rotation, launchd agent.

mod error;
pub mod launchd;
pub mod log_rotation;
pub mod paths;
mod runtime;
pub mod scheduler;

pub use error::DaemonError;
pub use launchd::{generate_plist, install as install_launchd, uninstall as uninstall_launchd};
pub use runtime::{run, start_blocking, ENV_LOG_FORMAT};
pub use scheduler::{run_every, SchedulerStats, SyncJob};
