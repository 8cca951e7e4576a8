use fs2::FileExt;
use std::fs::{File, OpenOptions};

use crate::paths::StatePaths;

/// Exclusive per-instance lock backed by `<state>/LOCK`.
/// Automatically released when dropped.
pub struct StateLock {
    _file: File,
}

impl StateLock {
    /// Try to acquire the instance lock (non-blocking).
    /// Returns an error if another daemon already holds it.
    pub fn acquire(paths: &StatePaths) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&paths.lock_file)
            .map_err(|e| {
                anyhow::anyhow!("cannot open lock file {}: {}", paths.lock_file.display(), e)
            })?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "state directory is locked by another skald daemon ({})",
                paths.lock_file.display()
            )
        })?;

        Ok(Self { _file: file })
    }
}
