//! File watcher feeding the incremental re-index pipeline.
//!
//! Change events are debounced by a trailing-edge timer: a burst of events
//! collapses into one index job. At most one job runs at a time; events
//! arriving mid-job coalesce into a single pending follow-up.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Debounce window: wait this long after the last event before indexing.
pub const DEBOUNCE_MS: u64 = 500;

/// Where a debounced job lands: an in-process indexer call, or an enqueue to
/// the durable work queue.
pub trait JobSink: Send + 'static {
    fn submit(&self);
}

impl<F: Fn() + Send + 'static> JobSink for F {
    fn submit(&self) {
        self()
    }
}

/// Handle keeping the watcher alive. Dropping it stops watching.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    stop: Arc<AtomicBool>,
}

impl WatchHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start watching `root` recursively and deliver debounced jobs to `sink`.
pub fn start(root: &PathBuf, sink: impl JobSink) -> Option<WatchHandle> {
    let (tx, rx) = mpsc::channel::<Event>();

    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create file watcher");
            return None;
        }
    };

    if let Err(e) = watcher.watch(root, RecursiveMode::Recursive) {
        warn!(root = %root.display(), error = %e, "failed to watch root");
        return None;
    }
    debug!(root = %root.display(), "watching for changes");

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    std::thread::spawn(move || debounce_loop(rx, sink, stop_flag));

    Some(WatchHandle { _watcher: watcher, stop })
}

fn is_relevant(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

fn debounce_loop(rx: mpsc::Receiver<Event>, sink: impl JobSink, stop: Arc<AtomicBool>) {
    let window = Duration::from_millis(DEBOUNCE_MS);
    let mut last_event: Option<Instant> = None;

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match rx.recv_timeout(window) {
            Ok(event) => {
                if is_relevant(&event) {
                    last_event = Some(Instant::now());
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Trailing edge: quiet for a full window after the last
                // relevant event.
                if let Some(t) = last_event {
                    if t.elapsed() >= window {
                        last_event = None;
                        sink.submit();
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Single-flight job runner
// ---------------------------------------------------------------------------

/// Serializes index jobs per root: one running job, at most one pending
/// follow-up. Intermediate submissions are dropped.
pub struct SingleFlight {
    job: Box<dyn Fn() + Send + Sync>,
    running: std::sync::Mutex<RunState>,
}

#[derive(Default)]
struct RunState {
    active: bool,
    pending: bool,
}

impl SingleFlight {
    pub fn new(job: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self { job: Box::new(job), running: std::sync::Mutex::new(RunState::default()) })
    }

    /// Run the job now, or mark a follow-up if one is already running.
    /// The follow-up fires exactly once no matter how many submissions
    /// arrived while the job was active.
    pub fn submit(self: &Arc<Self>) {
        {
            let mut state = self.running.lock().unwrap();
            if state.active {
                state.pending = true;
                return;
            }
            state.active = true;
        }

        let this = Arc::clone(self);
        std::thread::spawn(move || loop {
            (this.job)();
            let mut state = this.running.lock().unwrap();
            if state.pending {
                state.pending = false;
                continue;
            }
            state.active = false;
            break;
        });
    }
}
