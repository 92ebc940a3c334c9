use std::sync::Arc;
use std::time::Duration;

use tally_core::sync::{spawn_driver, SyncEvent, SyncOrchestrator};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::Level;

use crate::error::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Finished,
    Crashed,
    TimedOut,
}

/// Run the background driver until Ctrl-C, then flush the outbox and exit.
pub async fn run_watch(orchestrator: SyncOrchestrator) -> Result<(), CliError> {
    let orchestrator = Arc::new(orchestrator);
    let mut events = orchestrator.subscribe();
    let (handle, task) = spawn_driver(orchestrator.clone());
    handle.request_sync();
    println!("Watching for changes; press Ctrl-C to stop.");

    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Sync event reporter lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    println!("Flushing pending changes...");
    handle.teardown();
    let flush_limit = orchestrator.settings().request_timeout();
    if wait_for_flush(task, flush_limit).await == FlushOutcome::TimedOut {
        tracing::warn!(
            limit_secs = flush_limit.as_secs(),
            "Teardown flush did not finish in time; exiting anyway"
        );
    }
    reporter.abort();

    let pending = orchestrator.store().outbox_len().await?;
    if pending > 0 {
        println!("{pending} change(s) still pending; they will sync next time.");
    }
    Ok(())
}

/// Wait for the driver's teardown flush, but never longer than `limit`.
pub async fn wait_for_flush(task: JoinHandle<()>, limit: Duration) -> FlushOutcome {
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(())) => FlushOutcome::Finished,
        Ok(Err(error)) => {
            tracing::error!("Sync driver stopped abnormally: {error}");
            FlushOutcome::Crashed
        }
        Err(_) => FlushOutcome::TimedOut,
    }
}

/// Level at which an event is reported; lost changes are never quiet.
pub const fn event_level(event: &SyncEvent) -> Level {
    match event {
        SyncEvent::CycleCompleted { .. } => Level::INFO,
        SyncEvent::ItemRejected { .. }
        | SyncEvent::ItemAbandoned { .. }
        | SyncEvent::CycleFailed { .. }
        | SyncEvent::IntegrityMismatch { .. } => Level::WARN,
        SyncEvent::CycleStarted { .. } | SyncEvent::StateChanged { .. } => Level::DEBUG,
    }
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::CycleCompleted { report } => tracing::info!(
            acknowledged = report.acknowledged,
            merged = report.merged,
            removed = report.removed,
            "Sync cycle completed"
        ),
        SyncEvent::ItemRejected { reason, .. } => {
            tracing::warn!(%reason, "Server rejected a queued change");
        }
        SyncEvent::ItemAbandoned {
            collection,
            record_id,
            attempts,
            ..
        } => tracing::warn!(
            %collection,
            record = ?record_id,
            attempts,
            "Queued change discarded after repeated failures"
        ),
        SyncEvent::CycleFailed { error, will_retry } => {
            tracing::warn!(will_retry, "Sync cycle failed: {error}");
        }
        SyncEvent::IntegrityMismatch { expected, actual } => {
            tracing::warn!(%expected, %actual, "Full sync failed verification");
        }
        other => tracing::debug!(?other, "Sync event"),
    }
}
