use std::path::Path;

use anyhow::{bail, Result};
use skald_core::job::JobStatus;
use skald_daemon::config::DaemonConfig;
use skald_store::SqliteStore;

/// Execute `skald queue [--failed] [--reset JOB_ID]`
pub fn execute(config_path: Option<&Path>, failed: bool, reset: Option<&str>) -> Result<()> {
    let config = DaemonConfig::load(config_path)?;
    let paths = config.state_paths()?;
    if !paths.db_file.is_file() {
        bail!(
            "no state at {}; has the daemon ever run?",
            paths.root.display()
        );
    }
    let store = SqliteStore::open(&paths.db_file)?;

    if let Some(job_id) = reset {
        store.reset(job_id)?;
        println!("\u{21BB} job {job_id} reset to pending"); // ↻
        return Ok(());
    }

    if failed {
        return print_failures(&store);
    }

    let running = store.jobs_with_status(JobStatus::Running, 10)?;
    let pending = store.jobs_with_status(JobStatus::Pending, 20)?;
    if running.is_empty() && pending.is_empty() {
        println!("queue is empty");
        return Ok(());
    }
    for job in &running {
        println!(
            "\u{25B6} {}  {:<20} {}", // ▶
            job.id,
            job.kind.as_str(),
            job.session_file
        );
    }
    for job in &pending {
        println!(
            "\u{25CB} {}  {:<20} {}", // ○
            job.id,
            job.kind.as_str(),
            job.session_file
        );
    }
    Ok(())
}

fn print_failures(store: &SqliteStore) -> Result<()> {
    let failures = store.recent_failures(20)?;
    if failures.is_empty() {
        println!("no dead-lettered jobs");
        return Ok(());
    }
    for job in &failures {
        let (class, message) = match &job.error {
            Some(failure) => (failure.class.as_str(), failure.message.as_str()),
            None => ("unknown", ""),
        };
        println!(
            "\u{2717} {}  {:<12} {}", // ✗
            job.id,
            class,
            truncate(message, 72)
        );
        println!(
            "    {:<20} retried {}/{} times",
            job.kind.as_str(),
            job.retry_count,
            job.max_retries
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{head}\u{2026}") // …
}
