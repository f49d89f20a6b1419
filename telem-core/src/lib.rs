//! telem-core – the task lifecycle engine behind the telem task service.
//!
//! The engine admits persisted tasks under a concurrency bound, executes
//! their command and shell workloads with per-step output capture, packages
//! results into a per-task archive, sweeps expirations, and recovers
//! in-flight tasks across restarts. The REST boundary lives in the server
//! crate; this crate owns everything behind it.

pub mod config;
pub mod error;
pub mod runtime;
pub mod store;
pub mod task;

pub use config::CoreConfig;
pub use error::{CoreError, SubmitError};
pub use runtime::TaskService;
pub use store::{SqliteTaskStore, StoreError, TaskStore};
pub use task::{Task, TaskStatus};
