//! Process control for the background daemon.
//!
//! Pid-file bookkeeping, liveness probes, and signalling. Detaching and
//! signals are unix-only; other targets run the daemon in the foreground.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use skald_store::StatePaths;

/// Daemon pid, if the pid file exists and parses.
pub fn read_pid(paths: &StatePaths) -> Option<u32> {
    let text = std::fs::read_to_string(&paths.pid_file).ok()?;
    text.trim().parse().ok()
}

/// Record the current process id. Written via rename so a crash never
/// leaves a half-written pid behind.
pub fn write_pid(paths: &StatePaths) -> Result<()> {
    write_atomic(&paths.pid_file, std::process::id().to_string().as_bytes())
}

pub fn remove_pid(paths: &StatePaths) {
    let _ = std::fs::remove_file(&paths.pid_file);
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let parent = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

/// True if a process with this pid exists. Signal 0 probes liveness
/// without delivering anything.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}

/// Pid of the live daemon for this state dir. A pid file pointing at a
/// dead process is stale and is removed here.
pub fn running_daemon(paths: &StatePaths) -> Option<u32> {
    let pid = read_pid(paths)?;
    if is_process_alive(pid) {
        Some(pid)
    } else {
        tracing::debug!(pid, "removing stale pid file");
        remove_pid(paths);
        None
    }
}

/// Ask a daemon to stop: SIGTERM drains in-flight work, SIGKILL with
/// `force` does not.
#[cfg(unix)]
pub fn signal_stop(pid: u32, force: bool) -> Result<()> {
    let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc != 0 {
        anyhow::bail!(
            "cannot signal pid {pid}: {}",
            std::io::Error::last_os_error()
        );
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn signal_stop(_pid: u32, _force: bool) -> Result<()> {
    anyhow::bail!("stopping a background daemon is only supported on unix")
}

/// Poll until the process exits or the timeout lapses.
pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    !is_process_alive(pid)
}

/// Detach into the background. Stdout and stderr land in the state-dir
/// log file; the forked child writes the pid file.
#[cfg(unix)]
pub fn daemonize(paths: &StatePaths) -> Result<()> {
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_file)
        .with_context(|| format!("cannot open log file {}", paths.log_file.display()))?;
    let stderr = log.try_clone().context("clone log handle")?;
    daemonize::Daemonize::new()
        .pid_file(&paths.pid_file)
        .chown_pid_file(true)
        .stdout(log)
        .stderr(stderr)
        .start()
        .context("failed to detach into the background")?;
    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize(_paths: &StatePaths) -> Result<()> {
    anyhow::bail!("background mode is only supported on unix; use --foreground")
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // Far above any real pid_max, so kill(2) reports ESRCH.
    const DEAD_PID: u32 = 0x3FFF_FFFF;

    fn test_paths() -> (tempfile::TempDir, StatePaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = StatePaths::at(dir.path());
        (dir, paths)
    }

    #[test]
    fn pid_roundtrip() {
        let (_dir, paths) = test_paths();
        assert_eq!(read_pid(&paths), None);
        write_pid(&paths).unwrap();
        assert_eq!(read_pid(&paths), Some(std::process::id()));
        remove_pid(&paths);
        assert_eq!(read_pid(&paths), None);
    }

    #[test]
    fn write_pid_overwrites_existing() {
        let (_dir, paths) = test_paths();
        std::fs::write(&paths.pid_file, "99999").unwrap();
        write_pid(&paths).unwrap();
        assert_eq!(read_pid(&paths), Some(std::process::id()));
    }

    #[test]
    fn garbage_pid_file_reads_as_none() {
        let (_dir, paths) = test_paths();
        std::fs::write(&paths.pid_file, "not a pid\n").unwrap();
        assert_eq!(read_pid(&paths), None);
    }

    #[cfg(unix)]
    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(DEAD_PID));
    }

    #[cfg(unix)]
    #[test]
    fn stale_pid_file_is_cleaned_up() {
        let (_dir, paths) = test_paths();
        std::fs::write(&paths.pid_file, DEAD_PID.to_string()).unwrap();
        assert_eq!(running_daemon(&paths), None);
        assert!(!paths.pid_file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn live_pid_file_reports_running() {
        let (_dir, paths) = test_paths();
        write_pid(&paths).unwrap();
        assert_eq!(running_daemon(&paths), Some(std::process::id()));
        // Still there: a live daemon's pid file must not be touched.
        assert!(paths.pid_file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn signalling_a_dead_pid_errors() {
        let err = signal_stop(DEAD_PID, false).unwrap_err();
        assert!(err.to_string().contains("cannot signal"));
    }

    #[cfg(unix)]
    #[test]
    fn wait_for_exit_returns_fast_for_dead_pid() {
        let started = Instant::now();
        assert!(wait_for_exit(DEAD_PID, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
