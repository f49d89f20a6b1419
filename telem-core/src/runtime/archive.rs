//! Archive producer: packages a task's output into its zip file.
//!
//! Runs the actual zip writing on a blocking thread and streams progress back
//! over two channels, one of processed path strings and one of error
//! descriptions. Both channels close when the producer is done; the runner
//! drains them concurrently.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const PROGRESS_BUFFER: usize = 32;

/// One archive production request.
#[derive(Debug)]
pub(crate) struct ArchiveJob {
    /// Task directory; its files are included recursively and entry names are
    /// relativized against it.
    pub task_dir: PathBuf,

    /// Destination archive. Excluded from its own contents.
    pub zip_path: PathBuf,

    /// Additional host paths or glob patterns; directories recurse.
    pub extra: Vec<String>,

    /// When set, files modified longer ago than this are skipped.
    pub max_age: Option<Duration>,
}

/// Start producing the archive; returns the progress channels.
pub(crate) fn produce(job: ArchiveJob) -> (mpsc::Receiver<String>, mpsc::Receiver<String>) {
    let (path_tx, path_rx) = mpsc::channel(PROGRESS_BUFFER);
    let (err_tx, err_rx) = mpsc::channel(PROGRESS_BUFFER);
    tokio::task::spawn_blocking(move || write_archive(job, path_tx, err_tx));
    (path_rx, err_rx)
}

fn write_archive(job: ArchiveJob, paths: mpsc::Sender<String>, errors: mpsc::Sender<String>) {
    let file = match File::create(&job.zip_path) {
        Ok(f) => f,
        Err(e) => {
            let _ = errors.blocking_send(format!("create {}: {e}", job.zip_path.display()));
            return;
        }
    };
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    let cutoff = job.max_age.map(|age| SystemTime::now() - age);

    let mut candidates = Vec::new();
    collect_dir(&job.task_dir, &job.zip_path, &mut candidates, &errors);
    for pattern in &job.extra {
        collect_pattern(pattern, &job.zip_path, &mut candidates, &errors);
    }

    for path in candidates {
        if let Some(cutoff) = cutoff {
            match path.metadata().and_then(|m| m.modified()) {
                Ok(modified) if modified < cutoff => {
                    debug!(path = %path.display(), "skipping aged-out file");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = errors.blocking_send(format!("stat {}: {e}", path.display()));
                    continue;
                }
            }
        }
        let name = entry_name(&path, &job.task_dir);
        match append_file(&mut zip, &path, &name, options) {
            Ok(()) => {
                let _ = paths.blocking_send(path.display().to_string());
            }
            Err(e) => {
                let _ = errors.blocking_send(format!("archive {}: {e}", path.display()));
            }
        }
    }

    if let Err(e) = zip.finish() {
        let _ = errors.blocking_send(format!("finish {}: {e}", job.zip_path.display()));
    }
}

/// Recursively gather every regular file under `dir`, excluding `skip`.
fn collect_dir(dir: &Path, skip: &Path, out: &mut Vec<PathBuf>, errors: &mpsc::Sender<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            let _ = errors.blocking_send(format!("read {}: {e}", dir.display()));
            return;
        }
    };
    for entry in entries {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if path == skip {
                    continue;
                }
                if path.is_dir() {
                    collect_dir(&path, skip, out, errors);
                } else {
                    out.push(path);
                }
            }
            Err(e) => {
                let _ = errors.blocking_send(format!("read {}: {e}", dir.display()));
            }
        }
    }
}

/// Expand one `File` entry; plain paths and glob patterns both land here.
fn collect_pattern(
    pattern: &str,
    skip: &Path,
    out: &mut Vec<PathBuf>,
    errors: &mpsc::Sender<String>,
) {
    let matches = match glob::glob(pattern) {
        Ok(matches) => matches,
        Err(e) => {
            let _ = errors.blocking_send(format!("bad file pattern {pattern}: {e}"));
            return;
        }
    };
    let mut matched = false;
    for entry in matches {
        match entry {
            Ok(path) => {
                matched = true;
                if path.is_dir() {
                    collect_dir(&path, skip, out, errors);
                } else {
                    out.push(path);
                }
            }
            Err(e) => {
                let _ = errors.blocking_send(format!("expand {pattern}: {e}"));
            }
        }
    }
    if !matched {
        let _ = errors.blocking_send(format!("no match for file entry: {pattern}"));
    }
}

/// Entry name inside the archive: path relative to the task directory, or the
/// bare file name for host paths outside it.
fn entry_name(path: &Path, task_dir: &Path) -> String {
    match path.strip_prefix(task_dir) {
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_owned()),
    }
}

fn append_file(
    zip: &mut ZipWriter<File>,
    path: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> io::Result<()> {
    zip.start_file(name, options).map_err(io::Error::other)?;
    let mut input = File::open(path)?;
    io::copy(&mut input, zip)?;
    Ok(())
}
