//! Decoder for the agent CLI's `stream-json` stdout.
//!
//! Each stdout line is a standalone JSON event. Skald only needs the
//! terminal `result` event, with assistant text as a fallback when that
//! event carries no result string; everything else is counted and
//! optionally teed to a capture file for later inspection.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;

use crate::launcher::AgentOutcome;

// ── Wire events ─────────────────────────────────────────────────────────────

/// One line of `--output-format stream-json` output.
///
/// The protocol has more event types than skald consumes; anything
/// unrecognized deserializes to [`AgentEvent::Unknown`] and is skipped.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Handshake emitted once the agent has initialized.
    System {
        subtype: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    /// An assistant turn. `message.content` holds the text blocks.
    Assistant { message: serde_json::Value },
    /// Terminal event, exactly one per run. Subtype is `success` or an
    /// error subtype such as `error_during_execution`.
    Result {
        subtype: String,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default, rename = "result")]
        result_text: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Fields of the terminal result event.
#[derive(Debug, Clone)]
pub struct ResultInfo {
    pub subtype: String,
    pub total_cost_usd: Option<f64>,
    pub error: Option<String>,
    pub result_text: Option<String>,
}

/// What the monitor saw over the lifetime of one agent run.
#[derive(Debug)]
pub struct MonitorResult {
    pub result: Option<ResultInfo>,
    /// Text of the result event, or the last assistant text block when
    /// the result event carried none.
    pub result_text: Option<String>,
    pub events_seen: u64,
    pub skipped_lines: u64,
}

// ── Monitor ─────────────────────────────────────────────────────────────────

/// Follows an agent's stdout until the process closes it.
pub struct StreamMonitor {
    reader: BufReader<ChildStdout>,
    tee: Option<BufWriter<File>>,
}

impl StreamMonitor {
    pub fn new(stdout: ChildStdout) -> Self {
        Self {
            reader: BufReader::new(stdout),
            tee: None,
        }
    }

    /// Mirror every raw stdout line to `path`. Best-effort: a capture
    /// file that cannot be opened downgrades to a warning, not a failed
    /// job.
    pub fn with_tee(mut self, path: Option<&Path>) -> Self {
        if let Some(path) = path {
            match File::create(path) {
                Ok(file) => self.tee = Some(BufWriter::new(file)),
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "cannot open agent capture file");
                }
            }
        }
        self
    }

    pub async fn run(mut self) -> Result<MonitorResult> {
        let mut line = String::new();
        let mut result: Option<ResultInfo> = None;
        let mut last_assistant_text: Option<String> = None;
        let mut events_seen = 0u64;
        let mut skipped_lines = 0u64;

        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .context("read agent stdout")?;
            if n == 0 {
                break;
            }
            if let Some(tee) = &mut self.tee {
                let _ = tee.write_all(line.as_bytes());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<AgentEvent>(trimmed) {
                Ok(AgentEvent::System {
                    subtype,
                    session_id,
                    model,
                }) => {
                    events_seen += 1;
                    tracing::debug!(%subtype, ?session_id, ?model, "agent stream initialized");
                }
                Ok(AgentEvent::Assistant { message }) => {
                    events_seen += 1;
                    if let Some(text) = assistant_text(&message) {
                        last_assistant_text = Some(text);
                    }
                }
                Ok(AgentEvent::Result {
                    subtype,
                    total_cost_usd,
                    error,
                    result_text,
                }) => {
                    events_seen += 1;
                    result = Some(ResultInfo {
                        subtype,
                        total_cost_usd,
                        error,
                        result_text,
                    });
                }
                Ok(AgentEvent::Unknown) => {
                    events_seen += 1;
                }
                Err(_) => {
                    // Not a protocol line. Count it and move on.
                    skipped_lines += 1;
                }
            }
        }
        if let Some(tee) = &mut self.tee {
            let _ = tee.flush();
        }
        tracing::debug!(events_seen, skipped_lines, "agent stream closed");

        let result_text = result
            .as_ref()
            .and_then(|info| info.result_text.clone())
            .or(last_assistant_text);
        Ok(MonitorResult {
            result,
            result_text,
            events_seen,
            skipped_lines,
        })
    }
}

/// Pull the last text block out of an assistant message.
fn assistant_text(message: &serde_json::Value) -> Option<String> {
    match message.get("content")? {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Array(blocks) => blocks.iter().rev().find_map(|block| {
            if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                block.get("text").and_then(|t| t.as_str()).map(str::to_string)
            } else {
                None
            }
        }),
        _ => None,
    }
}

// ── Outcome classification ──────────────────────────────────────────────────

/// Map stream contents and process exit onto an [`AgentOutcome`].
///
/// The result event is authoritative when present; exit code and stderr
/// only matter when the agent died without one.
pub fn classify_outcome(
    monitor: &MonitorResult,
    exit_code: Option<i32>,
    stderr: &str,
) -> AgentOutcome {
    match &monitor.result {
        Some(info) if info.subtype == "success" => AgentOutcome::Done {
            result_text: monitor.result_text.clone(),
            cost_usd: info.total_cost_usd,
        },
        Some(info) => {
            let error = info
                .error
                .clone()
                .unwrap_or_else(|| format!("agent reported result subtype {:?}", info.subtype));
            AgentOutcome::Crash { error }
        }
        None => {
            let code = match exit_code {
                Some(code) => code.to_string(),
                None => "unknown".to_string(),
            };
            let detail = truncated(stderr, 500);
            let error = if detail.is_empty() {
                format!("agent exited with code {code} without a result event")
            } else {
                format!("agent exited with code {code} without a result event: {detail}")
            };
            AgentOutcome::Crash { error }
        }
    }
}

fn truncated(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut cut = max;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &trimmed[..cut])
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command;

    async fn monitor_script(script: &str) -> MonitorResult {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sh");
        let stdout = child.stdout.take().expect("stdout piped");
        let result = StreamMonitor::new(stdout).run().await.expect("monitor run");
        child.wait().await.expect("child exit");
        result
    }

    #[tokio::test]
    async fn captures_result_event() {
        let script = r#"echo '{"type":"system","subtype":"init","session_id":"abc"}'; echo '{"type":"result","subtype":"success","total_cost_usd":0.25,"result":"{\"summary\":\"ok\"}"}'"#;
        let result = monitor_script(script).await;
        assert_eq!(result.events_seen, 2);
        let info = result.result.expect("result event");
        assert_eq!(info.subtype, "success");
        assert_eq!(info.total_cost_usd, Some(0.25));
        assert_eq!(result.result_text.as_deref(), Some("{\"summary\":\"ok\"}"));
    }

    #[tokio::test]
    async fn falls_back_to_last_assistant_text() {
        let script = r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"first"}]}}'; echo '{"type":"assistant","message":{"content":[{"type":"text","text":"{\"summary\":\"from assistant\"}"}]}}'; echo '{"type":"result","subtype":"success"}'"#;
        let result = monitor_script(script).await;
        assert_eq!(
            result.result_text.as_deref(),
            Some("{\"summary\":\"from assistant\"}")
        );
    }

    #[tokio::test]
    async fn counts_unknown_events_and_skips_noise() {
        let script = r#"echo '{"type":"tool_progress","pct":50}'; echo 'not json at all'; echo '{"type":"result","subtype":"success","result":"done"}'"#;
        let result = monitor_script(script).await;
        assert_eq!(result.events_seen, 2);
        assert_eq!(result.skipped_lines, 1);
    }

    #[tokio::test]
    async fn stream_without_result_yields_none() {
        let result = monitor_script(r#"echo '{"type":"system","subtype":"init"}'"#).await;
        assert!(result.result.is_none());
        assert!(result.result_text.is_none());
    }

    #[tokio::test]
    async fn tee_mirrors_raw_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let capture = dir.path().join("run.jsonl");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(r#"echo '{"type":"result","subtype":"success","result":"done"}'; echo 'plain noise'"#)
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sh");
        let stdout = child.stdout.take().expect("stdout piped");
        let result = StreamMonitor::new(stdout)
            .with_tee(Some(&capture))
            .run()
            .await
            .expect("monitor run");
        child.wait().await.expect("child exit");
        assert!(result.result.is_some());
        let raw = std::fs::read_to_string(&capture).expect("capture file");
        assert!(raw.contains(r#""subtype":"success""#));
        assert!(raw.contains("plain noise"));
    }

    #[test]
    fn classify_success_prefers_result_text() {
        let monitor = MonitorResult {
            result: Some(ResultInfo {
                subtype: "success".into(),
                total_cost_usd: Some(0.25),
                error: None,
                result_text: Some("payload".into()),
            }),
            result_text: Some("payload".into()),
            events_seen: 1,
            skipped_lines: 0,
        };
        match classify_outcome(&monitor, Some(0), "") {
            AgentOutcome::Done {
                result_text,
                cost_usd,
            } => {
                assert_eq!(result_text.as_deref(), Some("payload"));
                assert_eq!(cost_usd, Some(0.25));
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn classify_error_subtype_is_a_crash() {
        let monitor = MonitorResult {
            result: Some(ResultInfo {
                subtype: "error_during_execution".into(),
                total_cost_usd: None,
                error: Some("tool use rejected".into()),
                result_text: None,
            }),
            result_text: None,
            events_seen: 1,
            skipped_lines: 0,
        };
        match classify_outcome(&monitor, Some(0), "") {
            AgentOutcome::Crash { error } => assert_eq!(error, "tool use rejected"),
            other => panic!("expected Crash, got {other:?}"),
        }
    }

    #[test]
    fn classify_missing_result_reports_exit_and_stderr() {
        let monitor = MonitorResult {
            result: None,
            result_text: None,
            events_seen: 0,
            skipped_lines: 0,
        };
        match classify_outcome(&monitor, Some(2), "fatal: model not found\n") {
            AgentOutcome::Crash { error } => {
                assert!(error.contains("code 2"), "{error}");
                assert!(error.contains("model not found"), "{error}");
            }
            other => panic!("expected Crash, got {other:?}"),
        }
    }
}
