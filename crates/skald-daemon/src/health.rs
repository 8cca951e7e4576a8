//! Startup health checks.
//!
//! Run before the daemon commits to starting. Fatal findings abort
//! startup; warnings are printed and the daemon runs anyway.

use skald_agent::ClaudeCliLauncher;
use skald_store::{SqliteStore, StatePaths};

use crate::config::DaemonConfig;

#[derive(Debug, Default)]
pub struct HealthReport {
    pub fatal: Vec<String>,
    pub warnings: Vec<String>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.fatal.is_empty()
    }
}

pub fn run_checks(config: &DaemonConfig, paths: &StatePaths) -> HealthReport {
    let mut report = HealthReport::default();

    if !config.watch_dir.is_dir() {
        report.fatal.push(format!(
            "watched directory missing: {}",
            config.watch_dir.display()
        ));
    }

    // The state store must be creatable and writable before anything runs.
    let store_probe = paths
        .ensure_layout()
        .and_then(|()| SqliteStore::open_or_create(&paths.db_file).map(|_| ()));
    if let Err(err) = store_probe {
        report
            .fatal
            .push(format!("state store not writable: {err:#}"));
    }

    if let Err(err) = config.agent.load_system_prompt() {
        report.fatal.push(format!("{err:#}"));
    }

    let launcher = ClaudeCliLauncher::new(&config.agent.bin, &config.agent.model);
    match launcher.verify_available() {
        Err(err) => report.fatal.push(format!("{err:#}")),
        Ok(reported) => {
            if let Some(min) = &config.agent.min_version {
                match version_at_least(&reported, min) {
                    Some(true) => {}
                    Some(false) => report.fatal.push(format!(
                        "agent version {reported:?} is below required {min:?}"
                    )),
                    None => report.warnings.push(format!(
                        "cannot compare agent version {reported:?} against {min:?}"
                    )),
                }
            }
            if let Err(err) = launcher.probe_model() {
                report.warnings.push(format!("{err:#}"));
            }
        }
    }

    for tool in &config.agent.allowed_tools {
        if tool.is_empty() || tool.contains(',') || tool.chars().any(char::is_whitespace) {
            report
                .warnings
                .push(format!("allowed tool entry {tool:?} looks malformed"));
        }
    }

    report
}

/// Compare a reported version string against a required minimum.
/// `None` when either side has no parseable version in it.
fn version_at_least(reported: &str, min: &str) -> Option<bool> {
    let mut a = parse_version(reported)?;
    let mut b = parse_version(min)?;
    let len = a.len().max(b.len());
    a.resize(len, 0);
    b.resize(len, 0);
    Some(a >= b)
}

/// First whitespace-separated token starting with a digit, split into
/// numeric components. "1.0.128 (Agent CLI)" parses as [1, 0, 128].
fn parse_version(text: &str) -> Option<Vec<u64>> {
    let token = text
        .split_whitespace()
        .find(|t| t.chars().next().is_some_and(|c| c.is_ascii_digit()))?;
    let nums = token
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect::<Option<Vec<u64>>>()?;
    if nums.is_empty() {
        None
    } else {
        Some(nums)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
