//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

use telem_core::CoreConfig;

/// Runtime configuration for telem-server.
///
/// Every field has a default so the server works out-of-the-box without any
/// environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// Root directory for the task store and task data
    /// (default: `"./telem-data"`).
    pub persistent_dir: PathBuf,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Serve Swagger UI at `/swagger-ui`; disable in production to avoid
    /// exposing the API structure.
    pub enable_swagger: bool,

    /// Maximum number of concurrently running tasks.
    pub max_tasks: usize,

    /// Supervisor cycle in milliseconds.
    pub cycle_ms: u64,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("TELEM_BIND", "0.0.0.0:3000"),
            persistent_dir: PathBuf::from(env_or("TELEM_DATA_DIR", "./telem-data")),
            log_level: env_or("TELEM_LOG", "info"),
            log_json: std::env::var("TELEM_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            enable_swagger: std::env::var("TELEM_ENABLE_SWAGGER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            max_tasks: parse_env("TELEM_MAX_TASKS", 5),
            cycle_ms: parse_env("TELEM_CYCLE_MS", 1_000),
        }
    }

    /// Engine configuration derived from the server settings.
    pub fn core(&self) -> CoreConfig {
        let mut core = CoreConfig::new(self.persistent_dir.clone());
        core.max_in_flight = self.max_tasks;
        core.cycle = Duration::from_millis(self.cycle_ms);
        core
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
