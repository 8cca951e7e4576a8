use std::path::Path;

use anyhow::{bail, Context, Result};
use skald_core::job::{priority, JobContext, JobSpec};
use skald_daemon::config::DaemonConfig;
use skald_daemon::control;
use skald_store::{EnqueueError, SqliteStore};

/// Execute `skald analyze <PATH>`
pub fn execute(config_path: Option<&Path>, path: &Path) -> Result<()> {
    let config = DaemonConfig::load(config_path)?;
    let paths = config.state_paths()?;
    let session_file = path
        .canonicalize()
        .with_context(|| format!("session file not found: {}", path.display()))?;

    let store =
        SqliteStore::open_or_create(&paths.db_file)?.with_queue_config(config.queue_config());
    let spec = JobSpec::initial(&session_file, JobContext::UserRequested)
        .with_priority(priority::USER);
    let job = match store.enqueue(spec) {
        Ok(job) => job,
        Err(EnqueueError::Backpressure { pending, limit }) => {
            bail!("queue is full ({pending}/{limit} pending); try again later")
        }
        Err(EnqueueError::Storage(err)) => return Err(err),
    };

    println!(
        "\u{2713} enqueued {} for {}", // ✓
        job.id,
        session_file.display()
    );
    match control::running_daemon(&paths) {
        Some(_) => println!("  a running worker will pick it up shortly"),
        None => println!("  no daemon running; start one with `skald start`"),
    }
    Ok(())
}
