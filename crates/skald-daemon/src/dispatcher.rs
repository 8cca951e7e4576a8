//! Event dispatcher: turns session-file activity into analysis jobs.
//!
//! Runs on its own thread, fed by the watcher channel. Event bursts for
//! one file coalesce over a debounce window before a single scan. A
//! periodic rescan of the whole tree covers events the channel dropped
//! and files that changed while the daemon was down.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use skald_core::clock::now_unix;
use skald_core::job::{priority, JobContext, JobSpec};
use skald_session::{
    detect_boundaries, evaluate_readiness, load_records, plan_segments, BoundaryConfig, FileOrigin,
    ReadinessConfig,
};
use skald_store::{EnqueueError, SqliteStore};
use tokio_util::sync::CancellationToken;

use crate::watcher::is_session_file;

pub struct Dispatcher {
    store: SqliteStore,
    watch_dir: PathBuf,
    origin: FileOrigin,
    readiness: ReadinessConfig,
    boundary_config: BoundaryConfig,
    debounce: Duration,
    rescan_every: Duration,
}

impl Dispatcher {
    pub fn new(store: SqliteStore, watch_dir: impl Into<PathBuf>, origin: FileOrigin) -> Self {
        Self {
            store,
            watch_dir: watch_dir.into(),
            origin,
            readiness: ReadinessConfig::default(),
            boundary_config: BoundaryConfig::default(),
            debounce: Duration::from_millis(500),
            rescan_every: Duration::from_secs(60),
        }
    }

    pub fn with_readiness(mut self, readiness: ReadinessConfig) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_boundary_config(mut self, config: BoundaryConfig) -> Self {
        self.boundary_config = config;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_rescan_every(mut self, rescan_every: Duration) -> Self {
        self.rescan_every = rescan_every;
        self
    }

    /// Consume watcher events until cancelled. One rescan up front picks
    /// up whatever happened while the daemon was down.
    pub fn run(self, events: Receiver<PathBuf>, cancel: CancellationToken) {
        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

        if let Err(err) = self.rescan() {
            tracing::warn!(error = %format!("{err:#}"), "startup rescan failed");
        }
        let mut last_rescan = Instant::now();

        while !cancel.is_cancelled() {
            match events.recv_timeout(Duration::from_millis(100)) {
                Ok(path) => {
                    // Last event wins: the debounce clock restarts while
                    // the file keeps changing.
                    pending.insert(path, Instant::now());
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            let due: Vec<PathBuf> = pending
                .iter()
                .filter(|(_, seen)| now.duration_since(**seen) >= self.debounce)
                .map(|(path, _)| path.clone())
                .collect();
            for path in due {
                pending.remove(&path);
                self.scan_logged(&path);
            }

            if last_rescan.elapsed() >= self.rescan_every {
                if let Err(err) = self.rescan() {
                    tracing::warn!(error = %format!("{err:#}"), "periodic rescan failed");
                }
                last_rescan = Instant::now();
            }
        }
        tracing::debug!("dispatcher stopped");
    }

    fn scan_logged(&self, path: &Path) {
        match self.scan_file(path) {
            Ok(0) => {}
            Ok(jobs) => {
                tracing::info!(path = %path.display(), jobs, "segments enqueued");
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "scan failed");
            }
        }
    }

    /// Scan one session file and enqueue every ready segment. Returns
    /// the number of jobs enqueued.
    ///
    /// The watermark only advances past segments the queue accepted, so
    /// a rejected segment is re-planned on the next scan.
    pub fn scan_file(&self, path: &Path) -> Result<usize> {
        let session_key = path.to_string_lossy().into_owned();
        let loaded = load_records(path)?;
        if loaded.skipped > 0 {
            tracing::debug!(path = %path.display(), skipped = loaded.skipped, "unparseable lines in session log");
        }
        if loaded.records.is_empty() {
            return Ok(0);
        }

        let boundaries = detect_boundaries(&loaded.records, &self.boundary_config);
        let watermark = self
            .store
            .watermark(&session_key)?
            .map(|w| w.analyzed_until);
        let mtime = file_mtime_unix(path)?;

        let Some(reason) = evaluate_readiness(
            &loaded.records,
            &boundaries,
            watermark,
            mtime,
            now_unix(),
            self.origin,
            &self.readiness,
        ) else {
            return Ok(0);
        };

        let mut enqueued = 0;
        for plan in plan_segments(&loaded.records, &boundaries, watermark, reason) {
            let context = JobContext::Segment {
                reason: plan.reason.as_str().to_string(),
                boundary_kind: plan.boundary_kind.map(|k| k.as_str().to_string()),
            };
            let mut spec = JobSpec::initial(path, context)
                .with_segment(plan.start_id.clone(), plan.end_id.clone());
            if plan.contains_fork {
                spec = spec.with_priority(priority::FORK);
            }

            match self.store.enqueue(spec) {
                Ok(job) => {
                    self.store
                        .set_watermark(&session_key, plan.end_ts_unix, plan.end_id.as_deref())?;
                    enqueued += 1;
                    tracing::debug!(
                        job_id = %job.id,
                        path = %path.display(),
                        reason = plan.reason.as_str(),
                        "segment job enqueued"
                    );
                }
                Err(EnqueueError::Backpressure { pending, limit }) => {
                    tracing::warn!(
                        pending,
                        limit,
                        path = %path.display(),
                        "queue full, deferring remaining segments"
                    );
                    break;
                }
                Err(EnqueueError::Storage(err)) => return Err(err),
            }
        }
        Ok(enqueued)
    }

    /// Walk the watch dir and scan every session file. Per-file failures
    /// are logged, not fatal; a vanished file must not stall the rest.
    pub fn rescan(&self) -> Result<usize> {
        let mut total = 0;
        for path in collect_session_files(&self.watch_dir)? {
            match self.scan_file(&path) {
                Ok(jobs) => total += jobs,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "rescan of file failed");
                }
            }
        }
        Ok(total)
    }
}

fn file_mtime_unix(path: &Path) -> Result<i64> {
    let meta = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let mtime = meta
        .modified()
        .with_context(|| format!("no mtime for {}", path.display()))?;
    Ok(mtime
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}

/// All session files under a directory tree, sorted for stable scan order.
fn collect_session_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries =
            std::fs::read_dir(&dir).with_context(|| format!("read dir {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if is_session_file(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

// ── Tests ───────────────────────────────────────────────────────────────────
