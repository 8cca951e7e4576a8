//! Filesystem watcher for session files.
//!
//! notify's callback runs on its own thread and must never block, so
//! events go through a bounded channel with `try_send`. A full channel
//! drops the event and counts it; the dispatcher's periodic rescan
//! recovers anything dropped here.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Channel slots between the watcher callback and the dispatcher.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct SessionWatcher {
    // Dropping the watcher stops the event stream.
    _watcher: RecommendedWatcher,
    pub events: Receiver<PathBuf>,
    dropped: Arc<AtomicU64>,
}

impl SessionWatcher {
    /// Events dropped so far because the channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Watch a directory tree recursively for session-file writes.
pub fn watch(dir: &Path, capacity: usize) -> Result<SessionWatcher> {
    let (tx, rx) = std::sync::mpsc::sync_channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&dropped);

    let mut watcher =
        notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => forward(&event, &tx, &counter),
            Err(err) => tracing::warn!(%err, "file watcher error"),
        })
        .context("cannot create file watcher")?;
    watcher
        .watch(dir, RecursiveMode::Recursive)
        .with_context(|| format!("cannot watch {}", dir.display()))?;
    tracing::info!(dir = %dir.display(), "watching for session files");

    Ok(SessionWatcher {
        _watcher: watcher,
        events: rx,
        dropped,
    })
}

/// A path the daemon considers a session log.
pub fn is_session_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "jsonl")
}

fn forward(event: &Event, tx: &SyncSender<PathBuf>, dropped: &AtomicU64) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }
    for path in &event.paths {
        if !is_session_file(path) {
            continue;
        }
        match tx.try_send(path.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(path)) => {
                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    path = %path.display(),
                    total_dropped = total,
                    "event channel full, dropping; rescan will recover"
                );
            }
            // Dispatcher already shut down; nothing left to notify.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
