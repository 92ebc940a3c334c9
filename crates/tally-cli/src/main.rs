//! Tally CLI - record loyalty changes offline and sync them from the terminal.

mod cli;
mod commands;
mod config_profiles;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;
use tally_core::LocalStore;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::cleanup::run_cleanup;
use crate::commands::common::{open_store, profile_settings, resolve_db_path, sync_orchestrator};
use crate::commands::config::run_config;
use crate::commands::outbox::run_outbox;
use crate::commands::records::{run_delete, run_get, run_list, run_put, run_read, run_set};
use crate::commands::sync::run_sync_command;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("tally=info,tally_core=warn")
        }))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Config { command } => run_config(command, profile),
        command => {
            let db_path = resolve_db_path(cli.db_path)?;
            let store = open_store(&db_path).await?;
            tracing::debug!(path = %db_path.display(), "Opened local store");
            run_store_command(command, store, profile).await
        }
    }
}

async fn run_store_command(
    command: Commands,
    store: LocalStore,
    profile: Option<&str>,
) -> Result<(), CliError> {
    match command {
        Commands::Put { collection, json } => run_put(&store, &collection, &json).await,
        Commands::Delete { collection, id } => run_delete(&store, &collection, &id).await,
        Commands::Get { collection, id } => run_get(&store, &collection, &id).await,
        Commands::List { collection, json } => run_list(&store, &collection, json).await,
        Commands::Read { id } => run_read(&store, &id).await,
        Commands::Set { key, value } => run_set(&store, &key, &value).await,
        Commands::Sync { command } => run_sync_command(command, store, profile).await,
        Commands::Outbox { limit, json } => run_outbox(&store, limit, json).await,
        Commands::Cleanup { days } => {
            let settings = profile_settings(profile)?;
            run_cleanup(&store, days, &settings).await
        }
        Commands::Watch => run_watch(sync_orchestrator(store, profile)?).await,
        Commands::Config { command } => run_config(command, profile),
    }
}
