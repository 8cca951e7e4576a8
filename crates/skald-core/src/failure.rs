use crate::clock::now_rfc3339;
use serde::{Deserialize, Serialize};

// ── Failure taxonomy ──

/// Retry category for a failed job. The queue's `fail` path is the only
/// consumer; workers report a failure once and let the queue decide.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Broken input or invalid output. Never retried.
    Permanent,
    /// Rate-limit / overload pushback from the agent's provider.
    Throttled,
    /// Timeouts and connection failures.
    Transient,
    /// Anything unclassified; retried with a conservative budget.
    Unknown,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Permanent => "permanent",
            FailureClass::Throttled => "throttled",
            FailureClass::Transient => "transient",
            FailureClass::Unknown => "unknown",
        }
    }

    pub fn retryable(&self) -> bool {
        !matches!(self, FailureClass::Permanent)
    }

    /// Total attempts allowed before dead-lettering.
    pub fn retry_budget(&self) -> u32 {
        match self {
            FailureClass::Permanent => 0,
            FailureClass::Throttled => 5,
            FailureClass::Transient => 3,
            FailureClass::Unknown => 2,
        }
    }
}

/// Classify a raw failure message.
///
/// Matching is substring-based over the lowercased message; the agent and
/// session-loading paths phrase their errors so these patterns hit.
pub fn classify(message: &str) -> FailureClass {
    let m = message.to_lowercase();

    const PERMANENT: &[&str] = &[
        "enoent",
        "no such file",
        "session file not found",
        "session file is empty",
        "invalid session file",
        "schema validation",
        "failed validation",
    ];
    const THROTTLED: &[&str] = &[
        "rate limit",
        "rate_limit",
        "too many requests",
        "overloaded",
        "quota",
        "429",
        "529",
    ];
    const TRANSIENT: &[&str] = &[
        "timed out",
        "timeout",
        "connection refused",
        "connection reset",
        "connection closed",
        "econnrefused",
        "econnreset",
        "etimedout",
        "network",
    ];

    if PERMANENT.iter().any(|p| m.contains(p)) {
        FailureClass::Permanent
    } else if THROTTLED.iter().any(|p| m.contains(p)) {
        FailureClass::Throttled
    } else if TRANSIENT.iter().any(|p| m.contains(p)) {
        FailureClass::Transient
    } else {
        FailureClass::Unknown
    }
}

// ── Structured failure record ──

/// Stored on the job's `error` column as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFailure {
    pub message: String,
    pub class: FailureClass,
    pub retryable: bool,
    pub timestamp: String,
}

impl JobFailure {
    /// Build a failure record, classifying the message.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        let class = classify(&message);
        Self {
            retryable: class.retryable(),
            class,
            message,
            timestamp: now_rfc3339(),
        }
    }
}

// ── Backoff ──

/// Exponential retry delay: `min(base * multiplier^retry_count, max)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay_secs: i64,
    pub multiplier: i64,
    pub max_delay_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 60,
            multiplier: 2,
            max_delay_secs: 3600,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt *after* `retry_count` prior failures.
    pub fn delay_secs(&self, retry_count: u32) -> i64 {
        let factor = self
            .multiplier
            .checked_pow(retry_count)
            .unwrap_or(i64::MAX / 2);
        self.base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs)
    }
}
