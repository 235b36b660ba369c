//! Durable work queue for index jobs.
//!
//! Each job is one JSON file under `<data_dir>/queue/`, written via temp +
//! rename so a crash never leaves a half-written job. The worker drains
//! jobs in filename order (monotonic sequence numbers), so jobs enqueued
//! before a restart are picked up on the next launch.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const QUEUE_DIR: &str = "queue";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexJob {
    pub root: PathBuf,
    /// "full" or "incremental".
    pub mode: String,
}

pub struct DurableQueue {
    dir: PathBuf,
    seq: AtomicU64,
}

impl DurableQueue {
    pub fn open(data_dir: &Path) -> crate::error::Result<Self> {
        let dir = data_dir.join(QUEUE_DIR);
        std::fs::create_dir_all(&dir)?;
        // Resume the sequence after any jobs left over from a prior run.
        let max_seq = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_string_lossy()
                    .strip_suffix(".json")?
                    .parse::<u64>()
                    .ok()
            })
            .max()
            .unwrap_or(0);
        Ok(Self { dir, seq: AtomicU64::new(max_seq + 1) })
    }

    /// Append a job to the queue.
    pub fn enqueue(&self, job: &IndexJob) -> crate::error::Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("{seq:016}.json"));
        crate::manifest::write_atomic(&path, job)?;
        debug!(seq, "enqueued index job");
        Ok(())
    }

    /// Oldest pending job, removed from the queue on take.
    pub fn take(&self) -> Option<IndexJob> {
        let mut names: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        names.sort();
        for path in names {
            let Ok(text) = std::fs::read_to_string(&path) else { continue };
            let _ = std::fs::remove_file(&path);
            match serde_json::from_str::<IndexJob>(&text) {
                Ok(job) => return Some(job),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "dropping malformed job");
                }
            }
        }
        None
    }

    pub fn pending(&self) -> usize {
        std::fs::read_dir(&self.dir)
            .map(|rd| rd.filter_map(|e| e.ok()).count())
            .unwrap_or(0)
    }
}

/// Worker draining the queue into `run`. Polls between jobs; stops when the
/// flag flips.
pub fn spawn_worker(
    queue: Arc<DurableQueue>,
    run: impl Fn(IndexJob) + Send + 'static,
) -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    std::thread::spawn(move || {
        while !stop_flag.load(Ordering::Relaxed) {
            match queue.take() {
                Some(job) => run(job),
                None => std::thread::sleep(Duration::from_millis(200)),
            }
        }
    });
    stop
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_drain_in_enqueue_order() {
        let dir = tempfile::tempdir().unwrap();
        let q = DurableQueue::open(dir.path()).unwrap();
        q.enqueue(&IndexJob { root: "/a".into(), mode: "full".into() }).unwrap();
        q.enqueue(&IndexJob { root: "/b".into(), mode: "incremental".into() }).unwrap();
        assert_eq!(q.pending(), 2);

        assert_eq!(q.take().unwrap().root, PathBuf::from("/a"));
        assert_eq!(q.take().unwrap().root, PathBuf::from("/b"));
        assert!(q.take().is_none());
    }

    #[test]
    fn queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let q = DurableQueue::open(dir.path()).unwrap();
            q.enqueue(&IndexJob { root: "/kept".into(), mode: "full".into() }).unwrap();
        }
        let q = DurableQueue::open(dir.path()).unwrap();
        assert_eq!(q.pending(), 1);
        assert_eq!(q.take().unwrap().root, PathBuf::from("/kept"));
        // New jobs keep sequencing after the survivors.
        q.enqueue(&IndexJob { root: "/next".into(), mode: "full".into() }).unwrap();
        assert_eq!(q.take().unwrap().root, PathBuf::from("/next"));
    }

    #[test]
    fn malformed_jobs_are_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let q = DurableQueue::open(dir.path()).unwrap();
        std::fs::write(dir.path().join(QUEUE_DIR).join("0000000000000000.json"), "{bad").unwrap();
        q.enqueue(&IndexJob { root: "/ok".into(), mode: "full".into() }).unwrap();
        assert_eq!(q.take().unwrap().root, PathBuf::from("/ok"));
    }
}
