use std::path::Path;

use anyhow::Result;
use skald_daemon::config::DaemonConfig;
use skald_daemon::Scheduler;
use skald_store::SqliteStore;

/// Execute `skald run-nightly`
pub fn execute(config_path: Option<&Path>) -> Result<()> {
    let config = DaemonConfig::load(config_path)?;
    let paths = config.state_paths()?;
    let store =
        SqliteStore::open_or_create(&paths.db_file)?.with_queue_config(config.queue_config());

    let scheduler = Scheduler::new(store, config.schedule.clone(), config.analyzer_version);
    let report = scheduler.run_nightly()?;

    println!("\u{2713} nightly passes finished"); // ✓
    println!("  {:<24} {}", "reanalysis jobs", report.reanalysis);
    println!("  {:<24} {}", "connection jobs", report.connections);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skald_core::job::JobStatus;
    use skald_store::NodeRecord;
    use std::io::Write;

    #[test]
    fn nightly_enqueues_reanalysis_for_stale_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("sessions");
        std::fs::create_dir_all(&watch).unwrap();
        let config_file = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&config_file).unwrap();
        writeln!(f, "watch_dir: {}", watch.display()).unwrap();
        writeln!(f, "state_root: {}", dir.path().join("state").display()).unwrap();
        writeln!(f, "analyzer_version: 2").unwrap();
        drop(f);

        let config = DaemonConfig::load(Some(&config_file)).unwrap();
        let paths = config.state_paths().unwrap();
        let store = SqliteStore::open_or_create(&paths.db_file).unwrap();
        store
            .insert_node(&NodeRecord::new(
                "node-old",
                1,
                1,
                "/tmp/chat.jsonl",
                serde_json::json!({"summary": "stale"}),
            ))
            .unwrap();
        drop(store);

        execute(Some(&config_file)).unwrap();

        let store = SqliteStore::open(&paths.db_file).unwrap();
        let pending = store.jobs_with_status(JobStatus::Pending, 10).unwrap();
        assert!(!pending.is_empty());
    }
}
