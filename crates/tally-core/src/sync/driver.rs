//! Background task that turns timers and client events into sync cycles.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::events::SyncTrigger;
use super::orchestrator::{SyncOrchestrator, SyncOutcome};

const COMMAND_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverCommand {
    Trigger(SyncTrigger),
    Shutdown,
}

/// Cheap handle for feeding events to a running driver.
///
/// Sends never block; a full queue drops the trigger, which is harmless
/// because a cycle is already pending.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<DriverCommand>,
}

impl SyncHandle {
    /// Network connectivity came back.
    pub fn connectivity_restored(&self) -> bool {
        self.send(DriverCommand::Trigger(SyncTrigger::ConnectivityRestored))
    }

    /// Explicit user request.
    pub fn request_sync(&self) -> bool {
        self.send(DriverCommand::Trigger(SyncTrigger::Manual))
    }

    /// Flush the outbox once more and stop the driver.
    pub fn teardown(&self) -> bool {
        self.send(DriverCommand::Shutdown)
    }

    fn send(&self, command: DriverCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(?command, "Sync driver did not accept command: {error}");
                false
            }
        }
    }
}

/// Spawn the driver loop on the current runtime.
///
/// The loop runs a periodic cycle, retries after transient failures up to
/// `max_recovery_attempts` times, and exits after a teardown flush once
/// [`SyncHandle::teardown`] is called or every handle is dropped.
pub fn spawn(orchestrator: Arc<SyncOrchestrator>) -> (SyncHandle, JoinHandle<()>) {
    let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
    let task = tokio::spawn(run(orchestrator, receiver));
    (SyncHandle { commands }, task)
}

async fn run(orchestrator: Arc<SyncOrchestrator>, mut commands: mpsc::Receiver<DriverCommand>) {
    let settings = orchestrator.settings().clone();
    let mut periodic = time::interval(settings.periodic_interval());
    periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut retry_at: Option<Instant> = None;
    let mut recovery_attempts = 0_u32;

    if let Err(error) = orchestrator.refresh_notice().await {
        tracing::warn!("Failed to load sync notice: {error}");
    }
    tracing::info!(
        interval_secs = settings.periodic_interval_secs,
        "Sync driver started"
    );

    loop {
        let trigger = tokio::select! {
            command = commands.recv() => match command {
                Some(DriverCommand::Trigger(trigger)) => trigger,
                Some(DriverCommand::Shutdown) | None => break,
            },
            _ = periodic.tick() => SyncTrigger::Periodic,
            () = time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
                SyncTrigger::Retry
            }
        };

        match orchestrator.trigger(trigger).await {
            Ok(SyncOutcome::Completed(_)) => {
                recovery_attempts = 0;
                retry_at = None;
            }
            Ok(SyncOutcome::Backoff { .. }) => {
                if recovery_attempts < settings.max_recovery_attempts {
                    recovery_attempts += 1;
                    retry_at = Some(Instant::now() + settings.backoff_delay());
                    tracing::debug!(
                        attempt = recovery_attempts,
                        delay_secs = settings.backoff_delay_secs,
                        "Sync retry scheduled"
                    );
                } else {
                    tracing::warn!(
                        attempts = recovery_attempts,
                        "Sync recovery budget spent; waiting for the next trigger"
                    );
                    recovery_attempts = 0;
                    retry_at = None;
                    orchestrator.give_up_recovery();
                }
            }
            Ok(SyncOutcome::Skipped) => {}
            Err(error) => {
                tracing::warn!(%trigger, "Sync cycle failed: {error}");
                recovery_attempts = 0;
                retry_at = None;
            }
        }
    }

    match orchestrator.trigger(SyncTrigger::Teardown).await {
        Ok(outcome) => tracing::info!(?outcome, "Sync driver stopped after teardown flush"),
        Err(error) => tracing::warn!("Teardown flush failed: {error}"),
    }
}
