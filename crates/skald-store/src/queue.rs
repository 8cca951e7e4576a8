//! Durable priority job queue over the `jobs` table.
//!
//! Claiming is lease-based: a claim is a conditional UPDATE that flips a
//! pending row to running and stamps a lease expiry. A crashed worker
//! never releases anything; its lease simply lapses and the next claim
//! sweeps the job back to pending. All state transitions are
//! single-statement conditional updates, so the queue stays correct even
//! with several daemon processes pointed at the same database.

use anyhow::{bail, Context};
use rusqlite::{params, OptionalExtension};
use skald_core::clock::{now_rfc3339, now_unix};
use skald_core::failure::{FailureClass, JobFailure, RetryPolicy};
use skald_core::job::{AnalysisJob, JobContext, JobKind, JobSpec, JobStatus};
use skald_core::{new_job_id, JobId};

use crate::store::SqliteStore;

/// Retry budget a job starts with; replaced by the failure category's
/// budget the first time it fails.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// How many claim candidates to try per attempt before giving up.
const CLAIM_BATCH: i64 = 8;

// ── Configuration ──

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// `enqueue` rejects with backpressure at this many pending jobs.
    pub max_pending: u64,
    /// Seconds a claim stays exclusive before the job is up for grabs again.
    pub lease_secs: i64,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending: 500,
            lease_secs: 30 * 60,
            retry: RetryPolicy::default(),
        }
    }
}

// ── Results ──

/// Enqueue failure; backpressure is typed so callers can tell "queue full"
/// apart from a broken store.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("job queue is full: {pending} pending jobs (limit {limit})")]
    Backpressure { pending: u64, limit: u64 },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// What `fail` decided to do with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to pending; claimable again once the backoff delay passes.
    Retried { retry_count: u32, delay_secs: i64 },
    /// Dead-lettered; stays queryable and can be reset manually.
    DeadLettered {
        retry_count: u32,
        class: FailureClass,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    /// Mean wall-clock duration of the 50 most recent completions.
    pub avg_completion_secs: Option<f64>,
}

// ── Queue operations ──

impl SqliteStore {
    /// Insert a new pending job. Priority defaults from the kind when the
    /// spec does not set one.
    pub fn enqueue(&self, spec: JobSpec) -> Result<AnalysisJob, EnqueueError> {
        let pending = self
            .count_status(JobStatus::Pending)
            .map_err(EnqueueError::Storage)?;
        if pending >= self.queue.max_pending {
            return Err(EnqueueError::Backpressure {
                pending,
                limit: self.queue.max_pending,
            });
        }
        self.insert_job(spec).map_err(EnqueueError::Storage)
    }

    /// Claim the most urgent pending job for `worker_id`.
    ///
    /// Candidates are ordered by priority, then enqueue time; a pending
    /// job under retry backoff (future `lease_expiry`) is not claimable.
    /// Returns `None` when nothing is claimable.
    pub fn claim(&self, worker_id: &str) -> anyhow::Result<Option<AnalysisJob>> {
        let now = now_unix();
        // Guard scoped so the final job load below can relock.
        let claimed: Option<JobId> = {
            let conn = self.conn();
            let tx = conn.unchecked_transaction()?;

            // Crash recovery: running jobs whose lease lapsed go back to
            // pending with their retry count untouched.
            let reclaimed = tx.execute(
                "UPDATE jobs SET status = 'pending', worker_id = NULL, lease_expiry = NULL
                 WHERE status = 'running' AND lease_expiry IS NOT NULL AND lease_expiry <= ?1",
                params![now],
            )?;
            if reclaimed > 0 {
                tracing::warn!(reclaimed, "returned expired job leases to pending");
            }

            let candidates: Vec<JobId> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM jobs
                     WHERE status = 'pending' AND (lease_expiry IS NULL OR lease_expiry <= ?1)
                     ORDER BY priority ASC, queued_at ASC, id ASC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![now, CLAIM_BATCH], |row| row.get(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            let mut claimed: Option<JobId> = None;
            for id in candidates {
                // Conditional update: zero rows changed means another claimant
                // won the race, so move on to the next candidate.
                let updated = tx.execute(
                    "UPDATE jobs
                     SET status = 'running', worker_id = ?1, started_at = ?2, lease_expiry = ?3
                     WHERE id = ?4 AND status = 'pending'
                       AND (lease_expiry IS NULL OR lease_expiry <= ?5)",
                    params![
                        worker_id,
                        now_rfc3339(),
                        now + self.queue.lease_secs,
                        id,
                        now
                    ],
                )?;
                if updated == 1 {
                    claimed = Some(id);
                    break;
                }
            }
            tx.commit()?;
            claimed
        };

        match claimed {
            Some(id) => {
                tracing::debug!(job_id = %id, worker_id, "claimed job");
                self.job(&id)
            }
            None => Ok(None),
        }
    }

    /// Mark a running job completed and record the node it produced.
    pub fn complete(&self, job_id: &str, result_node_id: &str) -> anyhow::Result<()> {
        let updated = self.conn().execute(
            "UPDATE jobs
             SET status = 'completed', completed_at = ?1, result_node_id = ?2,
                 worker_id = NULL, lease_expiry = NULL, error = NULL
             WHERE id = ?3 AND status = 'running'",
            params![now_rfc3339(), result_node_id, job_id],
        )?;
        if updated != 1 {
            bail!("job {job_id} is not running; cannot complete");
        }
        tracing::debug!(job_id, result_node_id, "job completed");
        Ok(())
    }

    /// Report a failure on a running job. The message is classified here;
    /// the job either goes back to pending with backoff or dead-letters.
    pub fn fail(&self, job_id: &str, message: &str) -> anyhow::Result<FailOutcome> {
        let failure = JobFailure::classified(message);
        let error_json = serde_json::to_string(&failure)?;

        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let row: Option<(u32, String)> = tx
            .query_row(
                "SELECT retry_count, status FROM jobs WHERE id = ?1",
                params![job_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((retry_count, status)) = row else {
            bail!("job {job_id} not found");
        };
        if status != JobStatus::Running.as_str() {
            bail!("job {job_id} is not running (status={status}); cannot fail");
        }

        let budget = failure.class.retry_budget();
        let outcome = if !failure.retryable {
            // Dead-letter without touching retry_count: no retry happened.
            tx.execute(
                "UPDATE jobs
                 SET status = 'failed', completed_at = ?1, error = ?2, max_retries = ?3,
                     worker_id = NULL, lease_expiry = NULL
                 WHERE id = ?4 AND status = 'running'",
                params![now_rfc3339(), error_json, budget, job_id],
            )?;
            FailOutcome::DeadLettered {
                retry_count,
                class: failure.class,
            }
        } else {
            let next = retry_count + 1;
            if next >= budget {
                tx.execute(
                    "UPDATE jobs
                     SET status = 'failed', retry_count = ?1, completed_at = ?2, error = ?3,
                         max_retries = ?4, worker_id = NULL, lease_expiry = NULL
                     WHERE id = ?5 AND status = 'running'",
                    params![next, now_rfc3339(), error_json, budget, job_id],
                )?;
                FailOutcome::DeadLettered {
                    retry_count: next,
                    class: failure.class,
                }
            } else {
                // Backoff rides on lease_expiry: the pending row is not
                // claimable until that moment passes.
                let delay = self.queue.retry.delay_secs(retry_count);
                tx.execute(
                    "UPDATE jobs
                     SET status = 'pending', retry_count = ?1, max_retries = ?2, error = ?3,
                         worker_id = NULL, started_at = NULL, lease_expiry = ?4
                     WHERE id = ?5 AND status = 'running'",
                    params![next, budget, error_json, now_unix() + delay, job_id],
                )?;
                FailOutcome::Retried {
                    retry_count: next,
                    delay_secs: delay,
                }
            }
        };
        tx.commit()?;

        match outcome {
            FailOutcome::Retried {
                retry_count,
                delay_secs,
            } => {
                tracing::info!(
                    job_id,
                    retry_count,
                    delay_secs,
                    class = failure.class.as_str(),
                    "job failed, scheduled for retry"
                );
            }
            FailOutcome::DeadLettered { retry_count, class } => {
                tracing::warn!(
                    job_id,
                    retry_count,
                    class = class.as_str(),
                    error = %failure.message,
                    "job dead-lettered"
                );
            }
        }
        Ok(outcome)
    }

    /// Return a dead-lettered job to pending with a fresh retry budget.
    /// The job re-queues at the back of its priority band.
    pub fn reset(&self, job_id: &str) -> anyhow::Result<()> {
        let updated = self.conn().execute(
            "UPDATE jobs
             SET status = 'pending', retry_count = 0, max_retries = ?1, error = NULL,
                 queued_at = ?2, started_at = NULL, completed_at = NULL,
                 result_node_id = NULL, worker_id = NULL, lease_expiry = NULL
             WHERE id = ?3 AND status = 'failed'",
            params![DEFAULT_MAX_RETRIES, now_rfc3339(), job_id],
        )?;
        if updated != 1 {
            bail!("job {job_id} is not dead-lettered; only failed jobs can be reset");
        }
        tracing::info!(job_id, "dead-lettered job reset to pending");
        Ok(())
    }

    /// Counts by status plus the rolling average completion duration.
    pub fn stats(&self) -> anyhow::Result<QueueStats> {
        let mut stats = QueueStats::default();
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            let count = count as u64;
            match status.as_str() {
                "pending" => stats.pending = count,
                "running" => stats.running = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }

        let avg: Option<f64> = conn.query_row(
            "SELECT AVG(strftime('%s', completed_at) - strftime('%s', started_at))
             FROM (
                 SELECT started_at, completed_at FROM jobs
                 WHERE status = 'completed'
                   AND started_at IS NOT NULL AND completed_at IS NOT NULL
                 ORDER BY completed_at DESC, id DESC
                 LIMIT 50
             )",
            [],
            |row| row.get(0),
        )?;
        stats.avg_completion_secs = avg;
        Ok(stats)
    }

    /// Most recent dead-lettered jobs, newest first.
    pub fn recent_failures(&self, limit: u32) -> anyhow::Result<Vec<AnalysisJob>> {
        self.jobs_with_status(JobStatus::Failed, limit)
    }

    /// Jobs in one status, ordered the way that status is usually read:
    /// pending by claim order, running by start time, terminal newest first.
    pub fn jobs_with_status(
        &self,
        status: JobStatus,
        limit: u32,
    ) -> anyhow::Result<Vec<AnalysisJob>> {
        let order = match status {
            JobStatus::Pending => "priority ASC, queued_at ASC, id ASC",
            JobStatus::Running => "started_at ASC, id ASC",
            JobStatus::Completed | JobStatus::Failed => "completed_at DESC, id DESC",
        };
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY {order} LIMIT ?2");
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status.as_str(), limit], map_job_row)?;
        rows.collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(row_to_job)
            .collect()
    }

    /// Load one job by id.
    pub fn job(&self, job_id: &str) -> anyhow::Result<Option<AnalysisJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = self
            .conn()
            .query_row(&sql, params![job_id], map_job_row)
            .optional()?;
        row.map(row_to_job).transpose()
    }

    pub fn count_status(&self, status: JobStatus) -> anyhow::Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn insert_job(&self, spec: JobSpec) -> anyhow::Result<AnalysisJob> {
        let job = AnalysisJob {
            id: new_job_id(),
            kind: spec.kind,
            priority: spec.effective_priority(),
            session_file: spec.session_file.to_string_lossy().into_owned(),
            segment_start: spec.segment_start,
            segment_end: spec.segment_end,
            context: spec.context,
            status: JobStatus::Pending,
            queued_at: now_rfc3339(),
            started_at: None,
            completed_at: None,
            result_node_id: None,
            error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            worker_id: None,
            lease_expiry: None,
        };
        let context_json = serde_json::to_string(&job.context)?;
        self.conn().execute(
            "INSERT INTO jobs (
                id, kind, priority, session_file, segment_start, segment_end,
                context, status, queued_at, retry_count, max_retries
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                job.id,
                job.kind.as_str(),
                job.priority,
                job.session_file,
                job.segment_start,
                job.segment_end,
                context_json,
                job.status.as_str(),
                job.queued_at,
                job.retry_count,
                job.max_retries,
            ],
        )?;
        tracing::debug!(
            job_id = %job.id,
            kind = job.kind.as_str(),
            priority = job.priority,
            session_file = %job.session_file,
            "enqueued job"
        );
        Ok(job)
    }
}

// ── Row mapping ──

const JOB_COLUMNS: &str = "id, kind, priority, session_file, segment_start, segment_end, \
     context, status, queued_at, started_at, completed_at, \
     result_node_id, error, retry_count, max_retries, worker_id, lease_expiry";

struct JobRow {
    id: String,
    kind: String,
    priority: i64,
    session_file: String,
    segment_start: Option<String>,
    segment_end: Option<String>,
    context_str: String,
    status: String,
    queued_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    result_node_id: Option<String>,
    error_str: Option<String>,
    retry_count: u32,
    max_retries: u32,
    worker_id: Option<String>,
    lease_expiry: Option<i64>,
}

fn map_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        priority: row.get(2)?,
        session_file: row.get(3)?,
        segment_start: row.get(4)?,
        segment_end: row.get(5)?,
        context_str: row.get(6)?,
        status: row.get(7)?,
        queued_at: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
        result_node_id: row.get(11)?,
        error_str: row.get(12)?,
        retry_count: row.get(13)?,
        max_retries: row.get(14)?,
        worker_id: row.get(15)?,
        lease_expiry: row.get(16)?,
    })
}

fn row_to_job(row: JobRow) -> anyhow::Result<AnalysisJob> {
    let kind = JobKind::from_str(&row.kind)
        .with_context(|| format!("unknown job kind in store: {}", row.kind))?;
    let status = JobStatus::from_str(&row.status)
        .with_context(|| format!("unknown job status in store: {}", row.status))?;
    let context: JobContext = serde_json::from_str(&row.context_str)
        .with_context(|| format!("corrupt job context for {}", row.id))?;
    let error: Option<JobFailure> = match row.error_str {
        Some(s) => Some(
            serde_json::from_str(&s)
                .with_context(|| format!("corrupt failure record for {}", row.id))?,
        ),
        None => None,
    };
    Ok(AnalysisJob {
        id: row.id,
        kind,
        priority: row.priority,
        session_file: row.session_file,
        segment_start: row.segment_start,
        segment_end: row.segment_end,
        context,
        status,
        queued_at: row.queued_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
        result_node_id: row.result_node_id,
        error,
        retry_count: row.retry_count,
        max_retries: row.max_retries,
        worker_id: row.worker_id,
        lease_expiry: row.lease_expiry,
    })
}
