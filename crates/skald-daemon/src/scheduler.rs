//! Scheduled maintenance passes.
//!
//! Two cron-driven passes share one store connection: reanalysis of
//! nodes whose analyzer is outdated, and connection discovery over
//! recently analyzed nodes. `skald run-nightly` runs the same bodies
//! once, on demand.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use skald_core::job::{JobContext, JobKind, JobSpec};
use skald_store::{EnqueueError, SqliteStore};
use tokio_util::sync::CancellationToken;

use crate::config::ScheduleSection;

#[derive(Debug, Clone, Copy)]
enum PassKind {
    Reanalysis,
    ConnectionDiscovery,
}

impl PassKind {
    fn name(self) -> &'static str {
        match self {
            PassKind::Reanalysis => "reanalysis",
            PassKind::ConnectionDiscovery => "connection_discovery",
        }
    }
}

/// One cron expression with its next fire time. Missed ticks collapse:
/// a pass that was due while the loop was busy fires once, not once per
/// missed occurrence.
struct ScheduledPass {
    kind: PassKind,
    schedule: Schedule,
    next: Option<DateTime<Utc>>,
}

impl ScheduledPass {
    fn new(kind: PassKind, expr: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expr)
            .with_context(|| format!("invalid cron expression for {}: {expr:?}", kind.name()))?;
        let next = schedule.upcoming(Utc).next();
        Ok(Self {
            kind,
            schedule,
            next,
        })
    }

    fn due(&self, now: DateTime<Utc>) -> bool {
        self.next.is_some_and(|next| now >= next)
    }

    fn advance(&mut self, now: DateTime<Utc>) {
        self.next = self.schedule.after(&now).next();
    }
}

pub struct Scheduler {
    store: SqliteStore,
    config: ScheduleSection,
    analyzer_version: i64,
}

/// What one on-demand nightly run enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightlyReport {
    pub reanalysis: usize,
    pub connections: usize,
}

impl Scheduler {
    pub fn new(store: SqliteStore, config: ScheduleSection, analyzer_version: i64) -> Self {
        Self {
            store,
            config,
            analyzer_version,
        }
    }

    /// Tick until cancelled, firing each pass when its cron time comes.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut passes = vec![
            ScheduledPass::new(PassKind::Reanalysis, &self.config.reanalysis_cron)?,
            ScheduledPass::new(PassKind::ConnectionDiscovery, &self.config.connection_cron)?,
        ];
        tracing::debug!(
            reanalysis = %self.config.reanalysis_cron,
            connections = %self.config.connection_cron,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(30)) => {}
            }
            let now = Utc::now();
            for pass in &mut passes {
                if !pass.due(now) {
                    continue;
                }
                let result = match pass.kind {
                    PassKind::Reanalysis => self.run_reanalysis(),
                    PassKind::ConnectionDiscovery => self.run_connection_discovery(),
                };
                match result {
                    Ok(enqueued) => {
                        tracing::info!(pass = pass.kind.name(), enqueued, "scheduled pass finished");
                    }
                    Err(err) => {
                        tracing::warn!(
                            pass = pass.kind.name(),
                            error = %format!("{err:#}"),
                            "scheduled pass failed"
                        );
                    }
                }
                pass.advance(now);
            }
        }
        tracing::debug!("scheduler stopped");
        Ok(())
    }

    /// Enqueue reanalysis for latest node versions with an older
    /// analyzer, oldest analysis first.
    pub fn run_reanalysis(&self) -> Result<usize> {
        let stale = self
            .store
            .stale_nodes(self.analyzer_version, self.config.reanalysis_batch)?;
        let mut enqueued = 0;
        for node in stale {
            let spec = JobSpec::new(
                JobKind::Reanalysis,
                node.session_file.as_str(),
                JobContext::Reanalysis {
                    node_id: node.id.clone(),
                    node_version: node.version,
                    analyzer_version: self.analyzer_version,
                },
            )
            .with_segment(node.segment_start.clone(), node.segment_end.clone());
            match self.store.enqueue(spec) {
                Ok(job) => {
                    enqueued += 1;
                    tracing::debug!(job_id = %job.id, node_id = %node.id, "reanalysis enqueued");
                }
                Err(EnqueueError::Backpressure { pending, limit }) => {
                    tracing::warn!(pending, limit, "queue full, stopping reanalysis pass");
                    break;
                }
                Err(EnqueueError::Storage(err)) => return Err(err),
            }
        }
        Ok(enqueued)
    }

    /// Enqueue connection discovery for recently analyzed nodes past
    /// their cooldown. The cooldown stamp is written at enqueue time, so
    /// a still-pending job suppresses re-triggering on the next pass.
    pub fn run_connection_discovery(&self) -> Result<usize> {
        let lookback_secs = self.config.connection_lookback_days * 24 * 3600;
        let cooldown_secs = self.config.connection_cooldown_hours * 3600;
        let candidates = self.store.connection_candidates(
            lookback_secs,
            cooldown_secs,
            self.config.connection_batch,
        )?;
        let mut enqueued = 0;
        for node in candidates {
            let spec = JobSpec::new(
                JobKind::ConnectionDiscovery,
                node.session_file.as_str(),
                JobContext::ConnectionDiscovery {
                    node_id: node.id.clone(),
                },
            );
            match self.store.enqueue(spec) {
                Ok(job) => {
                    self.store.touch_connection(&node.id)?;
                    enqueued += 1;
                    tracing::debug!(job_id = %job.id, node_id = %node.id, "connection discovery enqueued");
                }
                Err(EnqueueError::Backpressure { pending, limit }) => {
                    tracing::warn!(pending, limit, "queue full, stopping connection pass");
                    break;
                }
                Err(EnqueueError::Storage(err)) => return Err(err),
            }
        }
        Ok(enqueued)
    }

    /// Both scheduled bodies, once, immediately.
    pub fn run_nightly(&self) -> Result<NightlyReport> {
        let reanalysis = self.run_reanalysis()?;
        let connections = self.run_connection_discovery()?;
        Ok(NightlyReport {
            reanalysis,
            connections,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
