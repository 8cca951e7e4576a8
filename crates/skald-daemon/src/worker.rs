//! Analysis workers.
//!
//! Each worker owns its own store connection and loops claim → prompt →
//! agent run → terminal store update. Retry and dead-letter decisions
//! live in the store's `fail` path; the worker only phrases what went
//! wrong. The payload schema gate sits here, between the agent's result
//! text and the node insert.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use skald_agent::{build_prompt, extract_payload, AgentLauncher, AgentOutcome, AnalysisPayload};
use skald_core::job::{AnalysisJob, JobContext};
use skald_core::new_node_id;
use skald_store::{FailOutcome, NodeRecord, QueueConfig, SqliteStore};
use tokio_util::sync::CancellationToken;

pub struct Worker {
    id: String,
    store: SqliteStore,
    launcher: Arc<dyn AgentLauncher>,
    analyzer_version: i64,
    poll: Duration,
}

impl Worker {
    /// Open a worker with its own store connection.
    pub fn open(
        id: impl Into<String>,
        db_file: &Path,
        queue: QueueConfig,
        launcher: Arc<dyn AgentLauncher>,
        analyzer_version: i64,
        poll: Duration,
    ) -> Result<Self> {
        let store = SqliteStore::open_or_create(db_file)?.with_queue_config(queue);
        Ok(Self {
            id: id.into(),
            store,
            launcher,
            analyzer_version,
            poll,
        })
    }

    /// Claim and run jobs until the graceful token fires. An in-flight
    /// job finishes; `force` kills its agent run.
    pub async fn run(self, cancel: CancellationToken, force: CancellationToken) {
        tracing::debug!(worker = %self.id, "worker started");
        while !cancel.is_cancelled() {
            let worked = match self.run_once(&force).await {
                Ok(worked) => worked,
                Err(err) => {
                    tracing::warn!(
                        worker = %self.id,
                        error = %format!("{err:#}"),
                        "worker iteration failed"
                    );
                    false
                }
            };
            if !worked {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll) => {}
                }
            }
        }
        tracing::debug!(worker = %self.id, "worker stopped");
    }

    /// Claim at most one job and drive it to a terminal store update.
    /// Returns whether a job was worked.
    pub async fn run_once(&self, force: &CancellationToken) -> Result<bool> {
        let Some(job) = self.store.claim(&self.id)? else {
            return Ok(false);
        };
        tracing::info!(
            worker = %self.id,
            job_id = %job.id,
            kind = job.kind.as_str(),
            attempt = job.retry_count + 1,
            "job claimed"
        );

        let prompt = build_prompt(&job);
        let outcome = self
            .launcher
            .run_job(&job, &prompt, job.retry_count + 1, force.child_token())
            .await;

        if force.is_cancelled() {
            // Killed mid-run: leave the job leased. The next claim's
            // lease sweep returns it to pending with its retry count
            // untouched.
            tracing::info!(worker = %self.id, job_id = %job.id, "job interrupted by forced shutdown");
            return Ok(true);
        }

        match outcome {
            Err(err) => self.record_failure(&job, &format!("{err:#}"))?,
            Ok(AgentOutcome::Timeout { after_secs }) => {
                self.record_failure(&job, &format!("agent timed out after {after_secs}s"))?;
            }
            Ok(AgentOutcome::Crash { error }) => self.record_failure(&job, &error)?,
            Ok(AgentOutcome::Done {
                result_text,
                cost_usd,
            }) => {
                let text = result_text.unwrap_or_default();
                match extract_payload(&text) {
                    Ok(payload) => self.record_success(&job, payload, cost_usd)?,
                    Err(err) => self.record_failure(&job, &format!("{err:#}"))?,
                }
            }
        }
        Ok(true)
    }

    fn record_success(
        &self,
        job: &AnalysisJob,
        payload: AnalysisPayload,
        cost_usd: Option<f64>,
    ) -> Result<()> {
        let node = self.node_for(job, payload)?;
        self.store.insert_node(&node)?;
        self.store.complete(&job.id, &node.id)?;
        tracing::info!(
            worker = %self.id,
            job_id = %job.id,
            node_id = %node.id,
            version = node.version,
            cost_usd = cost_usd.unwrap_or(0.0),
            "job completed"
        );
        Ok(())
    }

    /// The node a successful job produces. Reanalysis appends the next
    /// version of its target; everything else mints a fresh id, so
    /// connection reports stay append-only too.
    fn node_for(&self, job: &AnalysisJob, payload: AnalysisPayload) -> Result<NodeRecord> {
        let payload = serde_json::to_value(&payload)?;
        let (id, version) = match &job.context {
            JobContext::Reanalysis { node_id, .. } => {
                let latest = self
                    .store
                    .latest_node(node_id)?
                    .with_context(|| format!("reanalysis target {node_id} vanished"))?;
                (node_id.clone(), latest.version + 1)
            }
            _ => (new_node_id(), 1),
        };
        Ok(NodeRecord::new(
            id,
            version,
            self.analyzer_version,
            job.session_file.as_str(),
            payload,
        )
        .with_segment(job.segment_start.clone(), job.segment_end.clone()))
    }

    fn record_failure(&self, job: &AnalysisJob, message: &str) -> Result<()> {
        match self.store.fail(&job.id, message)? {
            FailOutcome::Retried {
                retry_count,
                delay_secs,
            } => {
                tracing::warn!(
                    worker = %self.id,
                    job_id = %job.id,
                    retry_count,
                    delay_secs,
                    error = message,
                    "job failed, will retry"
                );
            }
            FailOutcome::DeadLettered { retry_count, class } => {
                tracing::error!(
                    worker = %self.id,
                    job_id = %job.id,
                    retry_count,
                    class = class.as_str(),
                    error = message,
                    "job dead-lettered"
                );
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
