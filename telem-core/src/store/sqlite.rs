//! Sqlite implementation of [`TaskStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature. Records are serialized task JSON
//! in a single `tasks(key, record)` table; migrations are embedded at compile
//! time via `sqlx::migrate!` and run on connect.
//!
//! The runtime-verified `sqlx::query` form is used deliberately so no
//! `DATABASE_URL` environment variable is needed at compile time.

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use super::{StoreError, TaskStore};
use crate::task::Task;

/// Sqlite-backed task store.
#[derive(Clone, Debug)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Open (or create) the database at `url` and run pending migrations.
    ///
    /// `url` is any sqlx-compatible sqlite URL, e.g. `"sqlite://telem.db?mode=rwc"`
    /// or `"sqlite::memory:"` for tests.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        // Single connection: every store access serializes through it, and
        // `sqlite::memory:` keeps pointing at one database rather than one
        // per pooled connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Open the store file at `path`, creating it if absent.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Self::connect(&format!("sqlite://{}?mode=rwc", path.display())).await
    }
}

impl TaskStore for SqliteTaskStore {
    async fn put(&self, key: &str, task: &Task) -> Result<(), StoreError> {
        let record = serde_json::to_string(task)?;
        sqlx::query(
            "INSERT INTO tasks (key, record) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET record = excluded.record",
        )
        .bind(key)
        .bind(&record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Task>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT record FROM tasks WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(record,)| serde_json::from_str(&record).map_err(StoreError::from))
            .transpose()
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM tasks")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}
