//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use telem_core::{SqliteTaskStore, TaskService};

use crate::config::Config;

/// State shared across all HTTP handlers.
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Persistent task store; handlers read it directly for status queries.
    pub store: Arc<SqliteTaskStore>,
    /// Handle to the lifecycle engine for admission and cancellation.
    pub service: TaskService<SqliteTaskStore>,
}
