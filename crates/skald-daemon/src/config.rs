//! Daemon configuration.
//!
//! Loaded from YAML; every field has a default so an empty file (or no
//! file at all) yields a working configuration watching the standard
//! agent session directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use skald_session::{FileOrigin, ReadinessConfig};
use skald_store::{default_state_root, QueueConfig, StatePaths};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory tree to watch for `*.jsonl` session files.
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,
    /// Override for the state root; the instance directory is derived
    /// from the watch dir underneath it.
    #[serde(default)]
    pub state_root: Option<PathBuf>,
    /// Whether watched files are written locally or arrive via sync.
    /// Synced files get a longer stability window before analysis.
    #[serde(default)]
    pub origin: WatchOrigin,
    /// Number of concurrent analysis workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Seconds an idle worker waits between queue polls.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Seconds between full rescans of the watch dir. The rescan picks
    /// up anything the file watcher dropped or missed.
    #[serde(default = "default_rescan_secs")]
    pub rescan_secs: u64,
    /// Milliseconds a file must stay quiet before its events coalesce
    /// into one scan.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Minutes without new records before a session counts as idle.
    /// Also the gap that marks a resume edge inside a session.
    #[serde(default = "default_idle_minutes")]
    pub idle_minutes: i64,
    /// Version stamped on every node this daemon produces. Bump it to
    /// make the nightly reanalysis pass revisit old nodes.
    #[serde(default = "default_analyzer_version")]
    pub analyzer_version: i64,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub debug: DebugSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchOrigin {
    #[default]
    Local,
    Synced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    /// Enqueue rejects with backpressure past this many pending jobs.
    #[serde(default = "default_max_pending")]
    pub max_pending: u64,
    /// Minutes a claimed job stays leased to its worker.
    #[serde(default = "default_lease_minutes")]
    pub lease_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Agent CLI binary, resolved via PATH if not absolute.
    #[serde(default = "default_agent_bin")]
    pub bin: PathBuf,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub provider: Option<String>,
    /// Reject startup if `--version` reports something older than this.
    #[serde(default)]
    pub min_version: Option<String>,
    /// File whose contents are appended to the agent's system prompt.
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
    /// Minutes before a run is killed as timed out.
    #[serde(default = "default_agent_timeout_minutes")]
    pub timeout_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSection {
    /// Cron expression (with seconds) for the reanalysis pass.
    #[serde(default = "default_reanalysis_cron")]
    pub reanalysis_cron: String,
    /// Cron expression (with seconds) for the connection-discovery pass.
    #[serde(default = "default_connection_cron")]
    pub connection_cron: String,
    /// Stale nodes enqueued per reanalysis pass.
    #[serde(default = "default_reanalysis_batch")]
    pub reanalysis_batch: u32,
    /// Candidate nodes enqueued per connection-discovery pass.
    #[serde(default = "default_connection_batch")]
    pub connection_batch: u32,
    /// Days back a node's analysis may lie and still get a connection pass.
    #[serde(default = "default_lookback_days")]
    pub connection_lookback_days: i64,
    /// Hours between connection passes over the same node.
    #[serde(default = "default_cooldown_hours")]
    pub connection_cooldown_hours: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugSection {
    /// Mirror each agent run's raw stream into the state dir.
    #[serde(default)]
    pub capture_agent_output: bool,
}

// ── Loading ─────────────────────────────────────────────────────────────────

impl DaemonConfig {
    /// Load from an explicit path, or from the default location if it
    /// exists, or fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<DaemonConfig> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|p| p.is_file()),
        };
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read config {}", path.display()))?;
                let config: DaemonConfig = serde_yaml::from_str(&text)
                    .with_context(|| format!("cannot parse config {}", path.display()))?;
                Ok(config)
            }
            None => Ok(DaemonConfig::default()),
        }
    }

    /// State directory for this watch dir, under the configured or
    /// platform-default state root.
    ///
    /// The watch dir is canonicalized first so the same tree maps to the
    /// same instance whether it is named via symlink, relative path, or
    /// trailing slash. A missing dir falls back to the literal path so
    /// `status` and `stop` still resolve state.
    pub fn state_paths(&self) -> Result<StatePaths> {
        let root = match &self.state_root {
            Some(root) => root.clone(),
            None => default_state_root()?,
        };
        let watch = std::fs::canonicalize(&self.watch_dir).unwrap_or_else(|_| self.watch_dir.clone());
        Ok(StatePaths::for_instance(&root, &watch))
    }

    /// The watch dir resolved to its real path. Errors if it does not
    /// exist; the daemon refuses to start without it.
    pub fn canonical_watch_dir(&self) -> Result<PathBuf> {
        std::fs::canonicalize(&self.watch_dir)
            .with_context(|| format!("watched directory missing: {}", self.watch_dir.display()))
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_pending: self.queue.max_pending,
            lease_secs: self.queue.lease_minutes * 60,
            ..QueueConfig::default()
        }
    }

    pub fn readiness_config(&self) -> ReadinessConfig {
        ReadinessConfig {
            idle_timeout_secs: self.idle_minutes * 60,
            ..ReadinessConfig::default()
        }
    }

    pub fn file_origin(&self) -> FileOrigin {
        match self.origin {
            WatchOrigin::Local => FileOrigin::Local,
            WatchOrigin::Synced => FileOrigin::Synced,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            state_root: None,
            origin: WatchOrigin::default(),
            workers: default_workers(),
            poll_secs: default_poll_secs(),
            rescan_secs: default_rescan_secs(),
            debounce_ms: default_debounce_ms(),
            idle_minutes: default_idle_minutes(),
            analyzer_version: default_analyzer_version(),
            queue: QueueSection::default(),
            agent: AgentSection::default(),
            schedule: ScheduleSection::default(),
            debug: DebugSection::default(),
        }
    }
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
            lease_minutes: default_lease_minutes(),
        }
    }
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            bin: default_agent_bin(),
            model: default_model(),
            provider: None,
            min_version: None,
            prompt_file: None,
            allowed_tools: default_allowed_tools(),
            timeout_minutes: default_agent_timeout_minutes(),
        }
    }
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            reanalysis_cron: default_reanalysis_cron(),
            connection_cron: default_connection_cron(),
            reanalysis_batch: default_reanalysis_batch(),
            connection_batch: default_connection_batch(),
            connection_lookback_days: default_lookback_days(),
            connection_cooldown_hours: default_cooldown_hours(),
        }
    }
}

impl AgentSection {
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_minutes * 60
    }

    /// Contents of the configured prompt file, if any.
    pub fn load_system_prompt(&self) -> Result<Option<String>> {
        match &self.prompt_file {
            None => Ok(None),
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("prompt file not readable: {}", path.display()))?;
                Ok(Some(text))
            }
        }
    }
}

/// `<config dir>/skald/config.yaml`, the path `skald start` reads when
/// no `--config` is given.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("skald").join("config.yaml"))
}

// ── Defaults ────────────────────────────────────────────────────────────────

fn default_watch_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("projects")
}

fn default_workers() -> usize {
    2
}

fn default_poll_secs() -> u64 {
    5
}

fn default_rescan_secs() -> u64 {
    60
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_idle_minutes() -> i64 {
    10
}

fn default_analyzer_version() -> i64 {
    1
}

fn default_max_pending() -> u64 {
    500
}

fn default_lease_minutes() -> i64 {
    30
}

fn default_agent_bin() -> PathBuf {
    PathBuf::from("claude")
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_allowed_tools() -> Vec<String> {
    vec!["Read".to_string(), "Grep".to_string(), "Glob".to_string()]
}

fn default_agent_timeout_minutes() -> u64 {
    30
}

fn default_reanalysis_cron() -> String {
    // Seconds-resolution cron: 03:00 every day.
    "0 0 3 * * *".to_string()
}

fn default_connection_cron() -> String {
    "0 30 3 * * *".to_string()
}

fn default_reanalysis_batch() -> u32 {
    20
}

fn default_connection_batch() -> u32 {
    20
}

fn default_lookback_days() -> i64 {
    7
}

fn default_cooldown_hours() -> i64 {
    24
}

// ── Tests ───────────────────────────────────────────────────────────────────
