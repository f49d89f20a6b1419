//! The persistent task store: a durable mapping from task key to record.
//!
//! The store is a plain byte-blob map; it offers no transactions. Multi-step
//! consistency on `Status` is the supervisor's single-writer discipline, not
//! the store's concern.

pub mod sqlite;

use std::future::Future;

use thiserror::Error;

use crate::task::Task;

pub use sqlite::SqliteTaskStore;

/// The single error kind the store surfaces.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Contract of the persistent task map.
pub trait TaskStore: Send + Sync + 'static {
    /// Upsert the record under `key`, atomic with respect to concurrent gets.
    fn put(&self, key: &str, task: &Task)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Task>, StoreError>> + Send;

    /// Remove the record; returns whether it existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn keys(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}
