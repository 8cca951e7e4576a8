use std::path::Path;

use anyhow::Result;
use skald_daemon::config::DaemonConfig;
use skald_daemon::control;
use skald_store::SqliteStore;

/// Execute `skald status [--json]`
pub fn execute(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = DaemonConfig::load(config_path)?;
    let paths = config.state_paths()?;
    let pid = control::running_daemon(&paths);

    let store = if paths.db_file.is_file() {
        Some(SqliteStore::open(&paths.db_file)?)
    } else {
        None
    };

    if json {
        return print_json(&config, &paths.root, pid, store.as_ref());
    }

    match pid {
        Some(pid) => println!("\u{25B6} daemon running (pid {pid})"), // ▶
        None => println!("\u{25CB} daemon not running"),              // ○
    }
    println!("  {:<24} {}", "watch dir", config.watch_dir.display());
    println!("  {:<24} {}", "state", paths.root.display());

    let Some(store) = store else {
        println!("  {:<24} (no state yet)", "queue");
        return Ok(());
    };
    let stats = store.stats()?;
    println!();
    println!("  {:<24} {}", "pending jobs", stats.pending);
    println!("  {:<24} {}", "running jobs", stats.running);
    println!("  {:<24} {}", "completed jobs", stats.completed);
    println!("  {:<24} {}", "dead-lettered jobs", stats.failed);
    if let Some(avg) = stats.avg_completion_secs {
        println!("  {:<24} {avg:.1}s", "avg completion");
    }
    println!("  {:<24} {}", "analysis nodes", store.count_nodes()?);
    println!("  {:<24} {}", "sessions seen", store.count_watermarks()?);
    Ok(())
}

fn print_json(
    config: &DaemonConfig,
    state_root: &Path,
    pid: Option<u32>,
    store: Option<&SqliteStore>,
) -> Result<()> {
    let queue = match store {
        Some(store) => {
            let stats = store.stats()?;
            serde_json::json!({
                "pending": stats.pending,
                "running": stats.running,
                "completed": stats.completed,
                "failed": stats.failed,
                "avg_completion_secs": stats.avg_completion_secs,
            })
        }
        None => serde_json::Value::Null,
    };
    let value = serde_json::json!({
        "running": pid.is_some(),
        "pid": pid,
        "watch_dir": config.watch_dir,
        "state_root": state_root,
        "queue": queue,
        "nodes": store.map(SqliteStore::count_nodes).transpose()?,
        "sessions": store.map(SqliteStore::count_watermarks).transpose()?,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
