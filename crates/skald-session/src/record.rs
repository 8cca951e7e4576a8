use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::Path;
use time::OffsetDateTime;

// ── Record model ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[default]
    Message,
    BranchSummary,
    Compaction,
    Fork,
    #[serde(other)]
    Unknown,
}

/// One line of an append-only per-session JSONL log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    /// Present on branch_summary records: the attached summary text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl SessionRecord {
    pub fn ts_unix(&self) -> i64 {
        self.timestamp.unix_timestamp()
    }
}

// ── Loading ──

#[derive(Debug)]
pub struct LoadedSession {
    /// Records in file (append) order.
    pub records: Vec<SessionRecord>,
    /// Lines that were not valid records. Skipped, never fatal.
    pub skipped: usize,
}

impl LoadedSession {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recent record timestamp, by value rather than position, so a
    /// log with out-of-order appends still reports the newest activity.
    pub fn last_activity_unix(&self) -> Option<i64> {
        self.records.iter().map(SessionRecord::ts_unix).max()
    }
}

/// Read a session log line by line. Unparseable lines are counted and
/// skipped; only I/O failures propagate.
pub fn load_records(path: &Path) -> Result<LoadedSession> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("session file not found: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for line in reader.lines() {
        let line = line.with_context(|| format!("read failed: {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionRecord>(&line) {
            Ok(record) => records.push(record),
            Err(_) => skipped += 1,
        }
    }

    Ok(LoadedSession { records, skipped })
}
