//! Analysis agent integration for Skald.
//!
//! Workers hand a claimed job to an [`AgentLauncher`], which spawns the
//! configured agent CLI in non-interactive mode, follows its
//! `stream-json` stdout, and reports a coarse [`AgentOutcome`]. The
//! launcher is a trait so the daemon's workers and the scheduler can be
//! exercised in tests with a scripted [`MockLauncher`] instead of a
//! real subprocess.

pub mod launcher;
pub mod payload;
pub mod prompt;
pub mod stream;

pub use launcher::{
    job_session_id, AgentLauncher, AgentOutcome, ClaudeCliLauncher, MockLauncher,
    DEFAULT_TIMEOUT_SECS,
};
pub use payload::{extract_payload, AnalysisPayload};
pub use prompt::build_prompt;
pub use stream::{AgentEvent, MonitorResult, ResultInfo, StreamMonitor};
