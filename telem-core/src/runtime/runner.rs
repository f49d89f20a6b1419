//! Drives one admitted task to a terminal state.
//!
//! The runner owns the in-memory task for the whole span; nothing else writes
//! the progress fields. The supervisor communicates cancellation through the
//! task's cancellation token, never through status reads, and the token is
//! observed at step boundaries and raced against running child processes.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::runtime::archive::{self, ArchiveJob};
use crate::store::TaskStore;
use crate::task::{
    filename_from_command, Task, TaskStatus, STDERR_FILE_SUFFIX, STDOUT_FILE_SUFFIX,
};

#[derive(Debug, Clone, Copy)]
enum StepKind {
    Command,
    Shell,
}

pub(crate) struct Runner<S> {
    store: Arc<S>,
    config: Arc<CoreConfig>,
    completed_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl<S: TaskStore> Runner<S> {
    pub(crate) fn new(
        store: Arc<S>,
        config: Arc<CoreConfig>,
        completed_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            config,
            completed_tx,
            cancel,
        }
    }

    /// Execute every phase, persist the final status, and emit exactly one
    /// completion notification.
    pub(crate) async fn run(self, mut task: Task) {
        let key = task.key();

        self.exec_phase(&mut task, StepKind::Command).await;
        if task.status == Some(TaskStatus::Running) {
            self.exec_phase(&mut task, StepKind::Shell).await;
        }
        // A cancel during a phase's last step is only visible here.
        if task.status == Some(TaskStatus::Running) && self.cancel.is_cancelled() {
            task.status = Some(TaskStatus::Canceled);
        }
        if task.status == Some(TaskStatus::Running) {
            self.archive_phase(&mut task).await;
        }
        if task.status == Some(TaskStatus::Running) {
            task.status = Some(TaskStatus::Completed);
        }
        self.persist(&mut task).await;

        info!(task = %key, status = %task.status.map(|s| s.as_str()).unwrap_or("unset"), "task finished");
        if self.completed_tx.send(key.clone()).await.is_err() {
            warn!(task = %key, "supervisor gone; completion not delivered");
        }
    }

    /// Run one ordered list of steps, observing cancellation between steps
    /// and persisting the task after each one.
    async fn exec_phase(&self, task: &mut Task, kind: StepKind) {
        let items = match kind {
            StepKind::Command => task.command.clone(),
            StepKind::Shell => task.shell.clone(),
        };
        let Some(items) = items else { return };
        let dir = task.dir(&self.config.persistent_dir);

        for item in items {
            if self.cancel.is_cancelled() {
                task.status = Some(TaskStatus::Canceled);
                self.persist(task).await;
                return;
            }
            self.exec_step(task, &dir, &item, kind).await;
            let processed = match kind {
                StepKind::Command => task.process_command.get_or_insert_with(Vec::new),
                StepKind::Shell => task.process_shell.get_or_insert_with(Vec::new),
            };
            processed.push(item);
            self.persist(task).await;
        }
    }

    /// Execute a single step with stdout/stderr streaming into per-step
    /// files. Errors are recorded but never abort the sequence.
    async fn exec_step(&self, task: &mut Task, dir: &Path, item: &str, kind: StepKind) {
        let stem = filename_from_command(item);
        let stdout = match std::fs::File::create(dir.join(format!("{stem}{STDOUT_FILE_SUFFIX}"))) {
            Ok(f) => f,
            Err(e) => {
                task.push_error(format!("create stdout file for {item}: {e}"));
                return;
            }
        };
        let stderr = match std::fs::File::create(dir.join(format!("{stem}{STDERR_FILE_SUFFIX}"))) {
            Ok(f) => f,
            Err(e) => {
                task.push_error(format!("create stderr file for {item}: {e}"));
                return;
            }
        };

        let mut cmd = match kind {
            StepKind::Command => {
                let mut parts = item.split_whitespace();
                let Some(program) = parts.next() else {
                    task.push_error("empty command line");
                    return;
                };
                let mut cmd = Command::new(program);
                cmd.args(parts);
                cmd
            }
            StepKind::Shell => shell_command(item),
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        debug!(task = %task.key(), step = item, "spawning");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                task.push_error(format!("spawn {item}: {e}"));
                return;
            }
        };

        tokio::select! {
            status = child.wait() => match status {
                Ok(status) if !status.success() => {
                    task.push_error(format!(
                        "non-zero exit {} for: {item}",
                        status.code().map(|c| c.to_string()).unwrap_or_else(|| "(signal)".to_owned()),
                    ));
                }
                Ok(_) => {}
                Err(e) => task.push_error(format!("wait {item}: {e}")),
            },
            _ = self.cancel.cancelled() => {
                debug!(task = %task.key(), step = item, "canceled; terminating child");
                kill_graceful(&mut child).await;
                task.push_error(format!("canceled: {item}"));
            }
        }
    }

    /// Package step outputs and requested host files into the task archive,
    /// recording progress and persisting on inactivity.
    async fn archive_phase(&self, task: &mut Task) {
        let job = ArchiveJob {
            task_dir: task.dir(&self.config.persistent_dir),
            zip_path: task.zip_path(&self.config.persistent_dir),
            extra: task.file.clone().unwrap_or_default(),
            max_age: task
                .file_modified_seconds
                .and_then(|s| u64::try_from(s).ok())
                .map(std::time::Duration::from_secs),
        };
        let (mut paths, mut errors) = archive::produce(job);
        let mut paths_done = false;
        let mut errors_done = false;

        while !(paths_done && errors_done) {
            tokio::select! {
                p = paths.recv(), if !paths_done => match p {
                    Some(p) => task.process_zip.get_or_insert_with(Vec::new).push(p),
                    None => paths_done = true,
                },
                e = errors.recv(), if !errors_done => match e {
                    Some(e) => task.push_error(e),
                    None => errors_done = true,
                },
                _ = tokio::time::sleep(self.config.cycle) => {
                    self.persist(task).await;
                }
            }
        }
        self.persist(task).await;
    }

    /// Best-effort persistence: a store failure mid-run lands in the error
    /// log and execution continues.
    async fn persist(&self, task: &mut Task) {
        let key = task.key();
        if let Err(e) = self.store.put(&key, task).await {
            warn!(task = %key, error = %e, "persisting task failed");
            task.push_error(format!("persist: {e}"));
        }
    }
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

/// Terminate a child: SIGTERM first where supported, then a hard kill.
#[cfg(target_os = "linux")]
async fn kill_graceful(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    if let Some(id) = child.id() {
        let _ = kill(Pid::from_raw(id as i32), Signal::SIGTERM);
    }
    let _ = child.kill().await;
}

#[cfg(not(target_os = "linux"))]
async fn kill_graceful(child: &mut Child) {
    let _ = child.kill().await;
}
