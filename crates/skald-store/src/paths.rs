use std::path::{Path, PathBuf};

use anyhow::Context;

/// All well-known paths under one daemon instance's state directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub root: PathBuf,
    pub db_file: PathBuf,
    pub pid_file: PathBuf,
    pub lock_file: PathBuf,
    pub log_file: PathBuf,
    pub agent_log_dir: PathBuf,
}

impl StatePaths {
    /// Derive all paths from a state root. Pure computation, no I/O.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            db_file: root.join("skald.db"),
            pid_file: root.join("skald.pid"),
            lock_file: root.join("LOCK"),
            log_file: root.join("skald.log"),
            agent_log_dir: root.join("agent-logs"),
            root,
        }
    }

    /// State directory for one watched directory: `<state_root>/<instance-id>`.
    /// Daemons watching different trees never share state.
    pub fn for_instance(state_root: &Path, watch_dir: &Path) -> Self {
        Self::at(state_root.join(instance_id(watch_dir)))
    }

    /// Create the required directories. Idempotent.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.agent_log_dir)?;
        Ok(())
    }
}

/// Default state root: `<platform data dir>/skald`.
pub fn default_state_root() -> anyhow::Result<PathBuf> {
    let base = dirs::data_local_dir().context("no local data directory on this platform")?;
    Ok(base.join("skald"))
}

/// Stable short id for a watched directory: first 12 hex chars of the
/// blake3 hash of its path.
pub fn instance_id(watch_dir: &Path) -> String {
    let hex = blake3::hash(watch_dir.to_string_lossy().as_bytes()).to_hex();
    hex[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_builds_expected_layout() {
        let p = StatePaths::at("/var/lib/skald/abc");
        assert_eq!(p.db_file, PathBuf::from("/var/lib/skald/abc/skald.db"));
        assert_eq!(p.pid_file, PathBuf::from("/var/lib/skald/abc/skald.pid"));
        assert_eq!(p.lock_file, PathBuf::from("/var/lib/skald/abc/LOCK"));
        assert_eq!(p.log_file, PathBuf::from("/var/lib/skald/abc/skald.log"));
        assert_eq!(p.agent_log_dir, PathBuf::from("/var/lib/skald/abc/agent-logs"));
    }

    #[test]
    fn instance_id_is_stable_and_short() {
        let a = instance_id(Path::new("/home/u/.claude/projects"));
        let b = instance_id(Path::new("/home/u/.claude/projects"));
        let c = instance_id(Path::new("/home/u/other"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn for_instance_nests_under_root() {
        let p = StatePaths::for_instance(Path::new("/data/skald"), Path::new("/watched"));
        assert!(p.root.starts_with("/data/skald"));
        assert_eq!(
            p.root.file_name().unwrap().to_str().unwrap(),
            instance_id(Path::new("/watched"))
        );
    }

    #[test]
    fn ensure_layout_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let p = StatePaths::at(tmp.path().join("inst"));
        p.ensure_layout().unwrap();
        assert!(p.root.is_dir());
        assert!(p.agent_log_dir.is_dir());
    }
}
