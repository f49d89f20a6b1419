//! The task lifecycle runtime: service bring-up, supervision, execution, and
//! archiving.
//!
//! [`TaskService::start`] is the engine's front door. It purges expired
//! records, allocates the signal channels, starts the supervisor loop, and
//! re-enqueues tasks interrupted by a prior shutdown. The returned handle is
//! what the boundary layer uses to admit and cancel tasks.

mod archive;
mod runner;
mod supervisor;


use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::CoreConfig;
use crate::error::{CoreError, SubmitError};
use crate::store::TaskStore;
use crate::task::TaskStatus;
use supervisor::Supervisor;

/// Buffer for cancel requests; sends are non-blocking and the supervisor
/// drains the queue every tick.
const CANCEL_QUEUE: usize = 64;

/// Handle to a running task lifecycle engine.
pub struct TaskService<S> {
    admit_tx: mpsc::Sender<String>,
    cancel_tx: mpsc::Sender<String>,
    store: Arc<S>,
    config: Arc<CoreConfig>,
}

impl<S> Clone for TaskService<S> {
    fn clone(&self) -> Self {
        Self {
            admit_tx: self.admit_tx.clone(),
            cancel_tx: self.cancel_tx.clone(),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: TaskStore> TaskService<S> {
    /// Bring up the engine: purge expired tasks (before any admission),
    /// start the supervisor loop, and schedule startup recovery.
    pub async fn start(store: Arc<S>, config: Arc<CoreConfig>) -> Result<Self, CoreError> {
        purge_expired(&*store, &config).await?;

        let (admit_tx, admit_rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = mpsc::channel(CANCEL_QUEUE);
        let (completed_tx, completed_rx) = mpsc::channel(1);

        let supervisor = Supervisor::new(
            Arc::clone(&store),
            Arc::clone(&config),
            admit_rx,
            cancel_rx,
            completed_rx,
            completed_tx,
            cancel_tx.clone(),
        );
        tokio::spawn(supervisor.run());

        // Recovery sends block on the admission rendezvous, so it runs in the
        // background rather than delaying startup behind a full live set.
        tokio::spawn(recover_interrupted(Arc::clone(&store), admit_tx.clone()));

        Ok(Self {
            admit_tx,
            cancel_tx,
            store,
            config,
        })
    }

    /// Offer a persisted task for admission. Blocks until the supervisor
    /// accepts the key or the admission timeout elapses.
    pub async fn submit(&self, key: String) -> Result<(), SubmitError> {
        match tokio::time::timeout(self.config.admission_timeout(), self.admit_tx.send(key)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SubmitError::Shutdown),
            Err(_) => Err(SubmitError::CapacityExceeded),
        }
    }

    /// Request cancellation of a task. Never blocks; the supervisor picks the
    /// request up on its next tick.
    pub fn request_cancel(&self, key: &str) {
        if self.cancel_tx.try_send(key.to_owned()).is_err() {
            warn!(task = %key, "cancel queue full; request dropped");
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }
}

/// Startup purge: remove the directory of every record past its expiration
/// and mark the record Canceled. Runs to completion before any admission.
async fn purge_expired<S: TaskStore>(store: &S, config: &CoreConfig) -> Result<(), CoreError> {
    let now = Utc::now();
    for key in store.keys().await? {
        let Some(mut task) = store.get(&key).await? else {
            continue;
        };
        if task.expiration.is_none() {
            // Stored tasks always carry an expiration; flag the stray.
            warn!(task = %key, "stored task has no expiration");
            continue;
        }
        if !task.is_expired(now) {
            continue;
        }
        let dir = task.dir(&config.persistent_dir);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(task = %key, error = %e, "removing expired task directory");
            }
        }
        task.status = Some(TaskStatus::Canceled);
        store.put(&key, &task).await?;
        info!(task = %key, "expired task purged");
    }
    Ok(())
}

/// Startup recovery: re-enqueue every task a previous run left in Accepted or
/// Running, so interrupted workloads execute again from their first step.
async fn recover_interrupted<S: TaskStore>(store: Arc<S>, admit_tx: mpsc::Sender<String>) {
    let keys = match store.keys().await {
        Ok(keys) => keys,
        Err(e) => {
            error!(error = %e, "listing store keys for recovery");
            return;
        }
    };
    for key in keys {
        match store.get(&key).await {
            Ok(Some(task))
                if matches!(
                    task.status,
                    Some(TaskStatus::Accepted) | Some(TaskStatus::Running)
                ) =>
            {
                info!(task = %key, "re-enqueueing interrupted task");
                if admit_tx.send(key).await.is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => error!(task = %key, error = %e, "loading task during recovery"),
        }
    }
}
