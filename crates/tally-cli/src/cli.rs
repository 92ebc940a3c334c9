use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Record loyalty changes offline and sync them when connected")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for API configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Insert or update a record and queue the change
    Put {
        /// Collection name (e.g. transactions, notifications, config)
        collection: String,
        /// Record payload as a JSON object
        json: String,
    },
    /// Delete a record and queue the deletion
    #[command(alias = "rm")]
    Delete {
        /// Collection name
        collection: String,
        /// Record id
        id: String,
    },
    /// Show one record
    Get {
        /// Collection name
        collection: String,
        /// Record id
        id: String,
    },
    /// List the records of a collection
    #[command(alias = "ls")]
    List {
        /// Collection name
        collection: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a notification as read
    Read {
        /// Notification id
        id: String,
    },
    /// Set a user setting
    Set {
        /// Setting key
        key: String,
        /// Setting value (parsed as JSON, falling back to a plain string)
        value: String,
    },
    /// Run a sync cycle now
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// List pending outbox entries
    Outbox {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop synced records older than the retention window
    Cleanup {
        /// Retention window in days (profile setting when omitted)
        #[arg(long, value_name = "DAYS")]
        days: Option<u32>,
    },
    /// Keep syncing in the background until interrupted
    Watch,
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show local sync metadata and pending work
    Status {
        /// Also ask the server for its view
        #[arg(long)]
        remote: bool,
    },
    /// Force a full sync
    Full,
    /// Fetch app configuration updates
    Updates,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update the profile selected by `--profile`
    Init {
        /// Reconciliation API base URL
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Bearer token for the API
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Show the resolved profile
    Show,
}
