use tally_core::sync::{CycleReport, SyncOrchestrator, SyncOutcome, SyncTrigger};
use tally_core::util::unix_timestamp_now;
use tally_core::LocalStore;

use crate::cli::SyncCommands;
use crate::commands::common::{format_unix_seconds, sync_orchestrator};
use crate::error::CliError;

pub async fn run_sync_command(
    command: Option<SyncCommands>,
    store: LocalStore,
    profile: Option<&str>,
) -> Result<(), CliError> {
    match command {
        None => run_sync(&sync_orchestrator(store, profile)?).await,
        Some(SyncCommands::Status { remote }) => {
            let orchestrator = if remote {
                Some(sync_orchestrator(store.clone(), profile)?)
            } else {
                None
            };
            run_sync_status(&store, orchestrator.as_ref()).await
        }
        Some(SyncCommands::Full) => run_full_sync(&sync_orchestrator(store, profile)?).await,
        Some(SyncCommands::Updates) => run_updates(&sync_orchestrator(store, profile)?).await,
    }
}

pub async fn run_sync(orchestrator: &SyncOrchestrator) -> Result<(), CliError> {
    let outcome = orchestrator.trigger(SyncTrigger::Manual).await?;
    let report = completed_report(outcome)?;
    for line in format_cycle_report(&report) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_full_sync(orchestrator: &SyncOrchestrator) -> Result<(), CliError> {
    orchestrator.request_full_sync().await?;
    run_sync(orchestrator).await
}

pub async fn run_updates(orchestrator: &SyncOrchestrator) -> Result<(), CliError> {
    let updates = orchestrator.check_updates().await?;
    println!(
        "Client {} / server {}",
        updates.client_version, updates.server_version
    );
    if updates.requires_restart {
        println!("A newer app version is required; restart after upgrading.");
    }
    println!(
        "{} store update(s), {} promotion(s)",
        updates.updates.store_updates.len(),
        updates.updates.promotion_updates.len()
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&updates.updates.app_config)?
    );
    Ok(())
}

pub async fn run_sync_status(
    store: &LocalStore,
    orchestrator: Option<&SyncOrchestrator>,
) -> Result<(), CliError> {
    let status = store.sync_status().await?;
    let pending = store.outbox_len().await?;
    let balances = store.balances().await?;

    println!("Last sync:       {}", format_unix_seconds(status.last_sync));
    println!("Last full sync:  {}", format_unix_seconds(status.last_full_sync));
    println!("Full syncs:      {}", status.sync_count);
    println!("Pending changes: {pending}");
    println!("Points balance:  {}", balances.total_points);
    if status.needs_full_sync {
        println!("A full sync is required before the next incremental pull.");
    }
    if status.abandoned_since_full_sync > 0 {
        println!(
            "{} change(s) could not be delivered and were discarded.",
            status.abandoned_since_full_sync
        );
    }

    if let Some(orchestrator) = orchestrator {
        if let Some(message) = orchestrator.refresh_notice().await?.message() {
            println!("Notice:          {message}");
        }
        let remote = orchestrator.server_status().await?;
        println!();
        println!("Server time:     {}", format_unix_seconds(Some(remote.server_time)));
        println!("Server syncs:    {}", remote.sync_count);
        println!(
            "Server last full sync: {}",
            format_unix_seconds(remote.last_full_sync)
        );
        if remote.needs_full_sync {
            println!("Server recommends a full sync.");
        }
        let skew = remote.server_time.saturating_sub(unix_timestamp_now()).abs();
        if skew > 60 {
            tracing::warn!(skew_secs = skew, "Client clock differs from server clock");
        }
    }
    Ok(())
}

pub fn completed_report(outcome: SyncOutcome) -> Result<CycleReport, CliError> {
    match outcome {
        SyncOutcome::Completed(report) => Ok(report),
        SyncOutcome::Backoff { error, .. } => Err(CliError::SyncInterrupted(error)),
        SyncOutcome::Skipped => Err(CliError::SyncInterrupted(
            "another sync cycle is already running".to_string(),
        )),
    }
}

pub fn format_cycle_report(report: &CycleReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Sync completed: {} acknowledged, {} rejected, {} requeued",
        report.acknowledged, report.rejected, report.requeued
    )];
    if report.abandoned > 0 {
        lines.push(format!(
            "{} change(s) exceeded the retry limit and were discarded",
            report.abandoned
        ));
    }
    let pull = match report.pull {
        tally_core::sync::PullKind::None => "none",
        tally_core::sync::PullKind::Full => "full",
        tally_core::sync::PullKind::Incremental => "incremental",
    };
    lines.push(format!(
        "Pull: {pull} ({} merged, {} removed)",
        report.merged, report.removed
    ));
    lines
}
