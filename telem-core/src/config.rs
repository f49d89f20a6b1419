//! Engine tunables, threaded to the supervisor, runners, and the boundary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;

/// Configuration for the task lifecycle engine.
///
/// Every knob has a production default; tests shorten `cycle` and raise
/// `max_in_flight`.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Base name for the store file, `<app_name>.db` under `persistent_dir`.
    pub app_name: String,

    /// Root directory for the store file and all task data.
    pub persistent_dir: PathBuf,

    /// Maximum number of concurrently running tasks.
    pub max_in_flight: usize,

    /// Supervisor tick; also the resolution of expiration handling.
    pub cycle: Duration,

    /// Expiration stamped onto tasks created without one.
    pub default_expiration: TimeDelta,
}

impl CoreConfig {
    pub fn new(persistent_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_name: "telem".to_owned(),
            persistent_dir: persistent_dir.into(),
            max_in_flight: 5,
            cycle: Duration::from_secs(1),
            default_expiration: TimeDelta::hours(24),
        }
    }

    /// How long a caller waits on the admission rendezvous before the
    /// create request is compensated and rejected.
    pub fn admission_timeout(&self) -> Duration {
        self.cycle * 3
    }

    /// Path of the sqlite store file.
    pub fn db_path(&self) -> PathBuf {
        self.persistent_dir.join(format!("{}.db", self.app_name))
    }

    pub fn persistent_dir(&self) -> &Path {
        &self.persistent_dir
    }
}
