use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use skald_daemon::config::DaemonConfig;
use skald_daemon::control;

/// Execute `skald stop [--force]`
pub fn execute(config_path: Option<&Path>, force: bool) -> Result<()> {
    let config = DaemonConfig::load(config_path)?;
    let paths = config.state_paths()?;

    let Some(pid) = control::running_daemon(&paths) else {
        println!("\u{25CB} no daemon running"); // ○
        return Ok(());
    };

    control::signal_stop(pid, force)?;
    if control::wait_for_exit(pid, Duration::from_secs(10)) {
        // A killed daemon cannot clean up its own pid file.
        control::remove_pid(&paths);
        println!("\u{2713} daemon stopped (pid {pid})"); // ✓
    } else {
        println!(
            "\u{23F0} daemon (pid {pid}) is still draining in-flight work; \
             `skald stop --force` kills it" // ⏰
        );
    }
    Ok(())
}
