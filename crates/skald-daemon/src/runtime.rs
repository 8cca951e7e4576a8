//! Daemon runtime: wires the watcher, dispatcher, workers and scheduler
//! together under the instance's state lock.
//!
//! Shutdown is two-stage. The graceful token stops claiming new work
//! and lets in-flight jobs finish; the force token additionally kills
//! running agent processes, leaving their jobs leased so the lease
//! sweep returns them to pending.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use skald_agent::{AgentLauncher, ClaudeCliLauncher};
use skald_session::BoundaryConfig;
use skald_store::{SqliteStore, StateLock, StatePaths};
use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::control;
use crate::dispatcher::Dispatcher;
use crate::scheduler::Scheduler;
use crate::watcher::{self, EVENT_CHANNEL_CAPACITY};
use crate::worker::Worker;

/// Build the agent launcher the daemon's workers share.
pub fn build_launcher(
    config: &DaemonConfig,
    paths: &StatePaths,
) -> Result<Arc<dyn AgentLauncher>> {
    let agent = &config.agent;
    let capture_dir = config
        .debug
        .capture_agent_output
        .then(|| paths.agent_log_dir.clone());
    let launcher = ClaudeCliLauncher::new(agent.bin.clone(), agent.model.clone())
        .with_provider(agent.provider.clone())
        .with_system_prompt(agent.load_system_prompt()?)
        .with_allowed_tools(agent.allowed_tools.clone())
        .with_timeout_secs(agent.timeout_secs())
        .with_capture_dir(capture_dir);
    Ok(Arc::new(launcher))
}

/// Run the daemon until the graceful token fires.
pub async fn run(
    config: DaemonConfig,
    paths: StatePaths,
    cancel: CancellationToken,
    force: CancellationToken,
) -> Result<()> {
    let launcher = build_launcher(&config, &paths)?;
    run_with_launcher(config, paths, launcher, cancel, force).await
}

/// Same as [`run`] with the launcher injected. Tests swap in a mock.
pub async fn run_with_launcher(
    config: DaemonConfig,
    paths: StatePaths,
    launcher: Arc<dyn AgentLauncher>,
    cancel: CancellationToken,
    force: CancellationToken,
) -> Result<()> {
    paths.ensure_layout()?;
    let _lock = StateLock::acquire(&paths)?;
    control::write_pid(&paths)?;

    let watch_dir = config.canonical_watch_dir()?;
    tracing::info!(
        watch_dir = %watch_dir.display(),
        state = %paths.root.display(),
        workers = config.workers,
        "daemon starting"
    );

    // The watcher binding outlives the dispatcher thread; dropping it
    // would silence filesystem events.
    let session_watcher = watcher::watch(&watch_dir, EVENT_CHANNEL_CAPACITY)?;
    let events = session_watcher.events;

    let store =
        SqliteStore::open_or_create(&paths.db_file)?.with_queue_config(config.queue_config());
    let dispatcher = Dispatcher::new(store, watch_dir, config.file_origin())
        .with_readiness(config.readiness_config())
        .with_boundary_config(BoundaryConfig {
            resume_gap_secs: config.idle_minutes * 60,
        })
        .with_debounce(Duration::from_millis(config.debounce_ms))
        .with_rescan_every(Duration::from_secs(config.rescan_secs));
    let dispatcher_cancel = cancel.clone();
    let dispatcher_thread = std::thread::Builder::new()
        .name("skald-dispatch".into())
        .spawn(move || dispatcher.run(events, dispatcher_cancel))
        .context("cannot spawn dispatcher thread")?;

    let mut workers = Vec::with_capacity(config.workers);
    for i in 0..config.workers {
        let worker = Worker::open(
            format!("worker-{i}"),
            &paths.db_file,
            config.queue_config(),
            launcher.clone(),
            config.analyzer_version,
            Duration::from_secs(config.poll_secs),
        )?;
        workers.push(tokio::spawn(worker.run(cancel.clone(), force.clone())));
    }

    let scheduler_store =
        SqliteStore::open_or_create(&paths.db_file)?.with_queue_config(config.queue_config());
    let scheduler = Scheduler::new(
        scheduler_store,
        config.schedule.clone(),
        config.analyzer_version,
    );
    let scheduler_cancel = cancel.clone();
    let scheduler_task = tokio::spawn(async move {
        if let Err(err) = scheduler.run(scheduler_cancel).await {
            tracing::error!(error = %format!("{err:#}"), "scheduler failed");
        }
    });

    cancel.cancelled().await;
    tracing::info!("daemon shutting down");

    for handle in workers {
        let _ = handle.await;
    }
    let _ = scheduler_task.await;
    // The dispatcher polls its channel at 100ms, so this join is short.
    let _ = dispatcher_thread.join();

    control::remove_pid(&paths);
    tracing::info!("daemon stopped");
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────
