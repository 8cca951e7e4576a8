//! Spawning and supervising analysis agent runs.
//!
//! [`ClaudeCliLauncher`] drives a real agent CLI subprocess;
//! [`MockLauncher`] replays scripted outcomes so worker and scheduler
//! tests never fork anything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use skald_core::job::AnalysisJob;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::stream::{classify_outcome, StreamMonitor};

/// Wall-clock limit for one agent run, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30 * 60;

// ── Outcome ─────────────────────────────────────────────────────────────────

/// Coarse result of one agent invocation, before payload validation.
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    /// The stream's terminal result event reported success.
    Done {
        result_text: Option<String>,
        cost_usd: Option<f64>,
    },
    /// The agent errored, died, or exited without a result event.
    Crash { error: String },
    /// Hit the wall-clock limit and was killed.
    Timeout { after_secs: u64 },
}

// ── Launcher trait ──────────────────────────────────────────────────────────

/// Something that can run one analysis job to completion.
///
/// `attempt` is 1-based (`retry_count + 1`); launchers derive the agent
/// session id from it so retries never collide with a spent session.
#[async_trait::async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn run_job(
        &self,
        job: &AnalysisJob,
        prompt: &str,
        attempt: u32,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome>;
}

// ── Session ids ─────────────────────────────────────────────────────────────

/// Namespace for skald's v5 session ids.
const SKALD_NS: Uuid = Uuid::from_bytes([
    0x5c, 0xa1, 0xd0, 0x0e, 0x00, 0x00, 0x40, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
]);

/// Deterministic session id for one job attempt. The agent CLI rejects a
/// reused session id, so every retry needs a fresh one.
pub fn job_session_id(job_id: &str, attempt: u32) -> Uuid {
    Uuid::new_v5(&SKALD_NS, format!("{job_id}-{attempt}").as_bytes())
}

// ── CLI launcher ────────────────────────────────────────────────────────────

/// Runs the configured agent CLI in non-interactive `stream-json` mode.
pub struct ClaudeCliLauncher {
    agent_bin: PathBuf,
    model: String,
    provider: Option<String>,
    system_prompt: Option<String>,
    allowed_tools: Vec<String>,
    timeout_secs: u64,
    capture_dir: Option<PathBuf>,
}

impl ClaudeCliLauncher {
    pub fn new(agent_bin: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            agent_bin: agent_bin.into(),
            model: model.into(),
            provider: None,
            system_prompt: None,
            allowed_tools: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            capture_dir: None,
        }
    }

    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Mirror each run's raw stream to `<dir>/<job>-<attempt>.jsonl`.
    pub fn with_capture_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.capture_dir = dir;
        self
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Run `<agent-bin> --version` and return its trimmed stdout.
    ///
    /// Startup health checks call this; a binary that cannot execute is
    /// a fatal misconfiguration, not a per-job failure.
    pub fn verify_available(&self) -> Result<String> {
        let output = std::process::Command::new(&self.agent_bin)
            .arg("--version")
            .output()
            .with_context(|| {
                format!("agent binary {} is not executable", self.agent_bin.display())
            })?;
        if !output.status.success() {
            bail!(
                "agent binary {} exited with {} on --version",
                self.agent_bin.display(),
                output.status
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Cheap model probe: `--version` with the model flag attached. The
    /// CLI cannot validate aliases against the provider, so a rejection
    /// here is a startup warning rather than a fatal error.
    pub fn probe_model(&self) -> Result<()> {
        let output = std::process::Command::new(&self.agent_bin)
            .arg("--model")
            .arg(&self.model)
            .arg("--version")
            .output()
            .with_context(|| format!("model probe could not run {}", self.agent_bin.display()))?;
        if !output.status.success() {
            bail!(
                "model probe for {:?} exited with {}",
                self.model,
                output.status
            );
        }
        Ok(())
    }

    fn build_command(&self, prompt: &str, session_id: &str) -> Command {
        let mut cmd = Command::new(&self.agent_bin);
        cmd.arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--model")
            .arg(&self.model);
        if let Some(provider) = &self.provider {
            cmd.arg("--provider").arg(provider);
        }
        if let Some(system_prompt) = &self.system_prompt {
            if !system_prompt.is_empty() {
                cmd.arg("--append-system-prompt").arg(system_prompt);
            }
        }
        if !self.allowed_tools.is_empty() {
            cmd.arg("--allowedTools").arg(self.allowed_tools.join(","));
        }
        cmd.arg("--session-id").arg(session_id);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        // The daemon may itself be running under an agent; strip the
        // markers that stop the CLI from nesting.
        cmd.env_remove("CLAUDE_CODE").env_remove("CLAUDECODE");
        cmd
    }

    fn capture_path(&self, job: &AnalysisJob, attempt: u32) -> Option<PathBuf> {
        self.capture_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}-{attempt}.jsonl", job.id)))
    }
}

#[async_trait::async_trait]
impl AgentLauncher for ClaudeCliLauncher {
    async fn run_job(
        &self,
        job: &AnalysisJob,
        prompt: &str,
        attempt: u32,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome> {
        let session_id = job_session_id(&job.id, attempt).to_string();
        let mut child = self
            .build_command(prompt, &session_id)
            .spawn()
            .with_context(|| format!("failed to spawn agent {}", self.agent_bin.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("agent stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("agent stderr was not captured"))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let capture = self.capture_path(job, attempt);
        let monitor = StreamMonitor::new(stdout).with_tee(capture.as_deref());

        tracing::debug!(
            job_id = %job.id,
            attempt,
            %session_id,
            model = %self.model,
            "launching analysis agent"
        );

        tokio::select! {
            stream = monitor.run() => {
                let stream = stream?;
                let exit = child.wait().await.context("wait for agent exit")?;
                let stderr_text = stderr_task.await.unwrap_or_default();
                Ok(classify_outcome(&stream, exit.code(), &stderr_text))
            }
            _ = tokio::time::sleep(Duration::from_secs(self.timeout_secs)) => {
                tracing::warn!(job_id = %job.id, timeout_secs = self.timeout_secs, "agent run timed out, killing");
                let _ = child.kill().await;
                Ok(AgentOutcome::Timeout { after_secs: self.timeout_secs })
            }
            _ = cancel.cancelled() => {
                tracing::info!(job_id = %job.id, "agent run cancelled, killing");
                let _ = child.kill().await;
                Ok(AgentOutcome::Crash { error: "agent run cancelled by shutdown".into() })
            }
        }
    }
}

// ── Mock launcher ───────────────────────────────────────────────────────────

/// Scripted launcher for tests. Outcomes are keyed by job id and popped
/// in order; an unscripted job succeeds with a minimal payload.
#[derive(Default)]
pub struct MockLauncher {
    outcomes: Mutex<HashMap<String, Vec<AgentOutcome>>>,
    calls: Mutex<Vec<String>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, job_id: &str, outcomes: Vec<AgentOutcome>) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(job_id.to_string(), outcomes);
    }

    /// Job ids in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AgentLauncher for MockLauncher {
    async fn run_job(
        &self,
        job: &AnalysisJob,
        _prompt: &str,
        _attempt: u32,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome> {
        self.calls.lock().unwrap().push(job.id.clone());
        if cancel.is_cancelled() {
            return Ok(AgentOutcome::Crash {
                error: "agent run cancelled by shutdown".into(),
            });
        }
        if let Some(scripted) = self.outcomes.lock().unwrap().get_mut(&job.id) {
            if !scripted.is_empty() {
                return Ok(scripted.remove(0));
            }
        }
        Ok(AgentOutcome::Done {
            result_text: Some(r#"{"summary":"(mock) segment analyzed"}"#.to_string()),
            cost_usd: Some(0.01),
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
