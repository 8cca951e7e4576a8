use crate::failure::JobFailure;
use crate::{JobId, NodeId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Priorities ──

/// Queue priorities, lower = served first.
pub mod priority {
    pub const USER: i64 = 10;
    pub const FORK: i64 = 50;
    pub const INITIAL: i64 = 100;
    pub const REANALYSIS: i64 = 200;
    pub const CONNECTION_DISCOVERY: i64 = 300;
}

// ── Kind and status ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Initial,
    Reanalysis,
    ConnectionDiscovery,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Initial => "initial",
            JobKind::Reanalysis => "reanalysis",
            JobKind::ConnectionDiscovery => "connection_discovery",
        }
    }

    pub fn from_str(s: &str) -> Option<JobKind> {
        match s {
            "initial" => Some(JobKind::Initial),
            "reanalysis" => Some(JobKind::Reanalysis),
            "connection_discovery" => Some(JobKind::ConnectionDiscovery),
            _ => None,
        }
    }

    /// Priority used when the caller does not set one explicitly.
    pub fn default_priority(&self) -> i64 {
        match self {
            JobKind::Initial => priority::INITIAL,
            JobKind::Reanalysis => priority::REANALYSIS,
            JobKind::ConnectionDiscovery => priority::CONNECTION_DISCOVERY,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Completed and failed jobs never re-enter the queue on their own;
    /// failed jobs can only come back via an explicit reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

// ── Typed job context ──

/// What a job is about, beyond its segment bounds. Serialized as tagged
/// JSON into the queue's `context` column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobContext {
    /// Enqueued by `skald analyze` on explicit user request.
    UserRequested,
    /// Enqueued by the watcher path for a ready segment.
    Segment {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        boundary_kind: Option<String>,
    },
    /// Re-run analysis of an existing node with a newer analyzer.
    Reanalysis {
        node_id: NodeId,
        node_version: i64,
        analyzer_version: i64,
    },
    /// Look for cross-session connections seeded from one node.
    ConnectionDiscovery { node_id: NodeId },
}

// ── Job record ──

/// A queued unit of analysis work, mirroring one row of the `jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: JobId,
    pub kind: JobKind,
    pub priority: i64,
    pub session_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_end: Option<String>,
    pub context: JobContext,
    pub status: JobStatus,
    pub queued_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Unix seconds. For running jobs: when the claim lapses. For pending
    /// jobs: the earliest time a claim may succeed (retry backoff).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expiry: Option<i64>,
}

impl AnalysisJob {
    pub fn session_path(&self) -> &Path {
        Path::new(&self.session_file)
    }
}

// ── Enqueue spec ──

/// Input to the queue's `enqueue`: everything the caller decides, nothing
/// the queue derives (id, status, queued_at).
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub kind: JobKind,
    pub priority: Option<i64>,
    pub session_file: PathBuf,
    pub segment_start: Option<String>,
    pub segment_end: Option<String>,
    pub context: JobContext,
}

impl JobSpec {
    pub fn initial(session_file: impl Into<PathBuf>, context: JobContext) -> Self {
        Self::new(JobKind::Initial, session_file, context)
    }

    pub fn new(kind: JobKind, session_file: impl Into<PathBuf>, context: JobContext) -> Self {
        Self {
            kind,
            priority: None,
            session_file: session_file.into(),
            segment_start: None,
            segment_end: None,
            context,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_segment(mut self, start: Option<String>, end: Option<String>) -> Self {
        self.segment_start = start;
        self.segment_end = end;
        self
    }

    /// The priority actually used: explicit, or the kind's default.
    pub fn effective_priority(&self) -> i64 {
        self.priority.unwrap_or_else(|| self.kind.default_priority())
    }
}
