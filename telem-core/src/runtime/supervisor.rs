//! Single-writer arbiter of the live task set.
//!
//! One loop owns the live map; no other code reads or writes it. Channels are
//! the only cross-thread signal: `admit` (callers rendezvous, bounded by the
//! admission timeout), `cancel` (non-blocking sends), and `completed`
//! (runners report terminal). The loop drains `completed` every tick so a
//! finishing runner can never deadlock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CoreConfig;
use crate::runtime::runner::Runner;
use crate::store::TaskStore;
use crate::task::TaskStatus;

/// Runtime-only shadow of an admitted, not-yet-terminal task.
struct LiveTask {
    cancel: CancellationToken,
}

pub(crate) struct Supervisor<S> {
    store: Arc<S>,
    config: Arc<CoreConfig>,
    admit_rx: mpsc::Receiver<String>,
    cancel_rx: mpsc::Receiver<String>,
    completed_rx: mpsc::Receiver<String>,
    /// Handed to each runner for its single completion send.
    completed_tx: mpsc::Sender<String>,
    /// The expiration sweep re-enters the loop through the cancel channel.
    cancel_tx: mpsc::Sender<String>,
    live: HashMap<String, LiveTask>,
}

impl<S: TaskStore> Supervisor<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<S>,
        config: Arc<CoreConfig>,
        admit_rx: mpsc::Receiver<String>,
        cancel_rx: mpsc::Receiver<String>,
        completed_rx: mpsc::Receiver<String>,
        completed_tx: mpsc::Sender<String>,
        cancel_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            store,
            config,
            admit_rx,
            cancel_rx,
            completed_rx,
            completed_tx,
            cancel_tx,
            live: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            self.drain_cancels().await;
            self.drain_completed();
            self.admit_one().await;
            self.sweep_expired().await;
            tokio::time::sleep(self.config.cycle).await;
        }
    }

    /// Handle every pending cancel request. Live tasks get their token
    /// tripped and leave the live set; the runner still reports completion,
    /// which the loop discards as already-absent. Dormant non-terminal tasks
    /// are marked Canceled directly, so a task canceled before admission can
    /// never start.
    async fn drain_cancels(&mut self) {
        while let Ok(key) = self.cancel_rx.try_recv() {
            if let Some(entry) = self.live.remove(&key) {
                entry.cancel.cancel();
                info!(task = %key, "canceling live task");
            } else {
                self.cancel_dormant(&key).await;
            }
        }
    }

    fn drain_completed(&mut self) {
        while let Ok(key) = self.completed_rx.try_recv() {
            if self.live.remove(&key).is_some() {
                debug!(task = %key, "task left the live set");
            }
        }
    }

    /// Admit one pending task when there is headroom.
    async fn admit_one(&mut self) {
        if self.live.len() >= self.config.max_in_flight {
            return;
        }
        let Ok(key) = self.admit_rx.try_recv() else {
            return;
        };
        let mut task = match self.store.get(&key).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                error!(task = %key, "admit for unknown task");
                return;
            }
            Err(e) => {
                error!(task = %key, error = %e, "loading task for admission");
                return;
            }
        };
        if task.uuid.is_none() || task.status.is_none() {
            error!(task = %key, "admit for task without uuid or status");
            return;
        }
        // A task canceled between creation and admission stays dead.
        if task.status.is_some_and(|s| s.is_terminal()) {
            info!(task = %key, "skipping admission of terminal task");
            return;
        }

        task.status = Some(TaskStatus::Running);
        if let Err(e) = self.store.put(&key, &task).await {
            error!(task = %key, error = %e, "marking task running");
            return;
        }

        let cancel = CancellationToken::new();
        self.live.insert(key.clone(), LiveTask {
            cancel: cancel.clone(),
        });
        info!(task = %key, live = self.live.len(), "task admitted");

        let runner = Runner::new(
            Arc::clone(&self.store),
            Arc::clone(&self.config),
            self.completed_tx.clone(),
            cancel,
        );
        tokio::spawn(runner.run(task));
    }

    /// Turn overdue live tasks into cancel requests; they re-enter the loop
    /// on the next tick.
    async fn sweep_expired(&mut self) {
        let now = Utc::now();
        for key in self.live.keys() {
            match self.store.get(key).await {
                Ok(Some(task)) if task.is_expired(now) => {
                    info!(task = %key, "live task expired; requesting cancel");
                    if self.cancel_tx.try_send(key.clone()).is_err() {
                        // Queue full; the next sweep retries.
                        warn!(task = %key, "cancel queue full during expiration sweep");
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => warn!(task = %key, "live task missing from store"),
                Err(e) => error!(task = %key, error = %e, "reading task during expiration sweep"),
            }
        }
    }

    async fn cancel_dormant(&self, key: &str) {
        match self.store.get(key).await {
            Ok(Some(mut task)) => match task.status {
                Some(status) if status.is_terminal() => {
                    debug!(task = %key, status = %status, "cancel for terminal task ignored");
                }
                Some(_) => {
                    task.status = Some(TaskStatus::Canceled);
                    if let Err(e) = self.store.put(key, &task).await {
                        error!(task = %key, error = %e, "marking dormant task canceled");
                    } else {
                        info!(task = %key, "dormant task canceled");
                    }
                }
                None => error!(task = %key, "cancel for task without status"),
            },
            Ok(None) => warn!(task = %key, "cancel for unknown task"),
            Err(e) => error!(task = %key, error = %e, "loading task for cancel"),
        }
    }
}
