use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use skald_daemon::config::DaemonConfig;
use skald_daemon::{control, health, runtime};
use tokio_util::sync::CancellationToken;

/// Execute `skald start [--foreground]`
pub fn execute(config_path: Option<&Path>, foreground: bool) -> Result<()> {
    let config = DaemonConfig::load(config_path)?;
    let paths = config.state_paths()?;

    if let Some(pid) = control::running_daemon(&paths) {
        bail!("daemon already running (pid {pid})");
    }

    let report = health::run_checks(&config, &paths);
    for warning in &report.warnings {
        println!("\u{26A0} {warning}"); // ⚠
    }
    if !report.healthy() {
        for problem in &report.fatal {
            println!("\u{2717} {problem}"); // ✗
        }
        bail!("startup checks failed");
    }

    let cancel = CancellationToken::new();
    let force = CancellationToken::new();
    signal_shutdown(cancel.clone(), force.clone());

    if foreground {
        println!("\u{25B6} watching {}", config.watch_dir.display()); // ▶
        println!("  state: {}", paths.root.display());
        println!("  Ctrl+C stops after in-flight work; twice kills it");
    } else {
        // Fork before the runtime exists; tokio threads do not survive it.
        control::daemonize(&paths)?;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(runtime::run(config, paths, cancel, force))?;
    Ok(())
}

/// First SIGINT/SIGTERM drains gracefully; the second kills in-flight
/// agent runs and leaves their jobs for the lease sweep.
fn signal_shutdown(cancel: CancellationToken, force: CancellationToken) {
    let calls = AtomicUsize::new(0);
    let _ = ctrlc::set_handler(move || {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            cancel.cancel();
        } else {
            force.cancel();
        }
    });
}
